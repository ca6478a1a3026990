//! Connection to the signaling relay
//!
//! A WebSocket split into a writer task draining an outbound queue and a
//! reader task that decodes relay messages into [`SessionEvent`]s.

use crate::session::SessionEvent;
use futures_util::{SinkExt, StreamExt};
use peerdrop_core::proto::{RelayEvent, RelayRequest, SignalPayload};
use peerdrop_core::{Error, Result, SessionId, SignalSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub struct RelayLink {
    outbound: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RelayLink {
    /// Connect to the relay at `url`
    ///
    /// Relay messages, and a final [`SessionEvent::RelayClosed`], are
    /// delivered on `events`.
    pub async fn connect(url: &str, events: mpsc::UnboundedSender<SessionEvent>) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", url, e)))?;
        info!("Connected to relay at {}", url);

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        let writer_open = open.clone();
        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = ws_write.send(Message::Text(text)).await {
                    warn!("Relay write failed: {}", e);
                    break;
                }
            }
            writer_open.store(false, Ordering::SeqCst);
            let _ = ws_write.close().await;
        });

        let reader_open = open.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match RelayEvent::from_json(&text) {
                        Ok(event) => {
                            if events.send(SessionEvent::Relay(event)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Malformed relay message: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Relay read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Relay connection ended");
            reader_open.store(false, Ordering::SeqCst);
            let _ = events.send(SessionEvent::RelayClosed);
        });

        Ok(Self {
            outbound,
            open,
            reader,
            writer,
        })
    }

    /// Drop the relay connection
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
    }
}

impl SignalSink for RelayLink {
    fn send_signal(&self, to: &SessionId, signal: SignalPayload) -> Result<()> {
        if !self.is_open() {
            return Err(Error::RelayUnavailable);
        }
        let text = RelayRequest::signal(to.clone(), signal).to_json()?;
        self.outbound
            .send(text)
            .map_err(|_| Error::RelayUnavailable)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
