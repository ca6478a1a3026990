//! WebSocket signaling server
//!
//! One task per connection. Each connection has a writer task draining its
//! outbound queue, and the connection task itself reads frames and routes
//! them through the shared [`Registry`]. Forwarding never waits on the
//! recipient: a full queue drops the frame.

use crate::{RelayConfig, RelayError, Registry, Result};
use futures_util::{SinkExt, StreamExt};
use peerdrop_core::proto::{ForwardedSignal, InboundFrame, RelayEvent};
use peerdrop_core::SessionId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::registry::ClientHandle;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What to do with one frame received from a client
#[derive(Debug)]
pub enum Route {
    /// Forward `frame` to the connection registered as `to`
    Deliver {
        to: SessionId,
        handle: ClientHandle,
        frame: String,
    },
    /// Addressed to an id nobody holds; dropped
    UnknownPeer(SessionId),
    /// Valid JSON but not a signal; dropped
    Ignored(String),
    /// Not a signal envelope at all; dropped
    Malformed(String),
}

/// Decide where a frame sent by `from` goes
///
/// The signal payload is copied verbatim; only the envelope around it is
/// rewritten, replacing `to` with the sender's own id as `from`.
pub fn route(registry: &Registry, from: &SessionId, raw: &str) -> Route {
    let frame = match InboundFrame::from_json(raw) {
        Ok(frame) => frame,
        Err(e) => return Route::Malformed(e.to_string()),
    };

    if !frame.is_signal() {
        return Route::Ignored(frame.kind);
    }

    let (to, signal) = match (frame.to, frame.signal) {
        (Some(to), Some(signal)) => (to, signal),
        (None, _) => return Route::Malformed("signal without 'to'".to_string()),
        (_, None) => return Route::Malformed("signal without 'signal'".to_string()),
    };

    let handle = match registry.lookup(&to) {
        Some(handle) => handle,
        None => return Route::UnknownPeer(to),
    };

    match ForwardedSignal::new(from, &signal).to_json() {
        Ok(frame) => Route::Deliver { to, handle, frame },
        Err(e) => Route::Malformed(e.to_string()),
    }
}

/// The signaling relay
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: RelayConfig,
}

impl RelayServer {
    /// Bind the listening socket described by `config`
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let registry = Arc::new(Registry::new(config.id_length));
        Self::bind_with_registry(config, registry).await
    }

    /// Bind with a caller-provided registry
    pub async fn bind_with_registry(config: RelayConfig, registry: Arc<Registry>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        Ok(Self {
            listener,
            registry,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The registry shared by all connections
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Accept connections forever
    pub async fn run(self) -> Result<()> {
        info!("Signaling relay listening on {}", self.local_addr()?);

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let registry = self.registry.clone();
            let outbound_buffer = self.config.outbound_buffer;

            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(stream, peer_addr, registry, outbound_buffer).await
                {
                    debug!("Connection from {} ended with error: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Serve one client from handshake to disconnect
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<Registry>,
    outbound_buffer: usize,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<String>(outbound_buffer.max(1));

    let client_id = registry.register(tx.clone())?;
    info!("Client {} connected from {}", client_id, peer_addr);

    // Spawn task to forward queued messages to the client
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let connect = RelayEvent::connect(client_id.clone()).to_json()?;
    if tx.send(connect).await.is_err() {
        registry.remove(&client_id);
        return Err(RelayError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "writer closed before connect was sent",
        )));
    }

    while let Some(result) = stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error from {}: {}", client_id, e);
                break;
            }
        };

        trace!("Received from {}: {}", client_id, text);

        match route(&registry, &client_id, &text) {
            Route::Deliver { to, handle, frame } => {
                // A recipient that stops reading only loses its own signals
                match handle.try_send(frame) {
                    Ok(()) => debug!("Forwarded signal {} -> {}", client_id, to),
                    Err(TrySendError::Full(_)) => {
                        warn!("Dropping signal from {} to {}: queue full", client_id, to);
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!("Dropping signal from {} to {}: disconnected", client_id, to);
                    }
                }
            }
            Route::UnknownPeer(to) => {
                warn!("Dropping signal from {} to unknown id {}", client_id, to);
            }
            Route::Ignored(kind) => {
                debug!("Ignoring '{}' message from {}", kind, client_id);
            }
            Route::Malformed(reason) => {
                warn!("Malformed message from {}: {}", client_id, reason);
            }
        }
    }

    registry.remove(&client_id);
    drop(tx);
    writer.abort();
    info!("Client {} disconnected", client_id);

    Ok(())
}
