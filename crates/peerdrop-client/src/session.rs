//! Session controller
//!
//! Owns one handshake, one direct channel and one transfer receiver, and
//! processes every event for the session in a single place. Everything the
//! relay, the connectivity subsystem and the channel report is turned into a
//! [`SessionEvent`] and handed to [`SessionController::handle_event`] one at
//! a time, so the handlers never run concurrently.
//!
//! Observers follow the session through a [`watch`] channel of
//! [`SessionSnapshot`]s.

use crate::handshake::{Handshake, HandshakeState};
use crate::link::{share_link, PeerTarget};
use crate::transfer::{self, ReceiveEvent, ReceivedFile, SendOutcome, TransferReceiver};
use peerdrop_core::proto::{Frame, IceCandidate, RelayEvent};
use peerdrop_core::{
    ConnectionStatus, DataChannel, FileMetadata, PeerConnection, Result, SessionId, SignalSink,
};
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything that can happen to a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A message from the relay
    Relay(RelayEvent),
    /// The relay connection went away
    RelayClosed,
    /// The connectivity subsystem found a local candidate; `None` marks the end
    LocalCandidate(Option<IceCandidate>),
    ChannelOpen,
    ChannelClosed,
    /// A frame arrived on the direct channel
    ChannelFrame(Frame),
}

/// How the session was started
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionOrigin {
    /// Waits for a peer, or connects when told to
    #[default]
    Direct,
    /// Opened from a shareable link; connects to the peer as soon as it can
    SharedLink(SessionId),
}

/// Observable state of a session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub local_id: Option<SessionId>,
    pub remote_id: Option<SessionId>,
    pub share_link: Option<String>,
    pub relay_open: bool,
    pub handshake: HandshakeState,
    pub status: ConnectionStatus,
    /// Percentage of the transfer in progress, in either direction
    pub progress: f64,
}

impl SessionSnapshot {
    /// Whether the session can start a handshake
    pub fn is_ready(&self) -> bool {
        self.relay_open && self.local_id.is_some()
    }
}

pub struct SessionController<P, C, S> {
    handshake: Handshake<P>,
    channel: C,
    signals: S,
    receiver: TransferReceiver,
    origin: SessionOrigin,
    share_origin: Option<String>,
    auto_connect: bool,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<P, C, S> SessionController<P, C, S>
where
    P: PeerConnection,
    C: DataChannel,
    S: SignalSink,
{
    pub fn new(origin: SessionOrigin, peer: P, channel: C, signals: S) -> Self {
        let auto_connect = matches!(origin, SessionOrigin::SharedLink(_));
        let (snapshot, _) = watch::channel(SessionSnapshot {
            relay_open: signals.is_open(),
            ..Default::default()
        });
        Self {
            handshake: Handshake::new(peer),
            channel,
            signals,
            receiver: TransferReceiver::new(),
            origin,
            share_origin: None,
            auto_connect,
            snapshot,
        }
    }

    /// Origin used to build this session's shareable link
    pub fn with_share_origin(mut self, origin: impl Into<String>) -> Self {
        self.share_origin = Some(origin.into());
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn origin(&self) -> &SessionOrigin {
        &self.origin
    }

    pub fn handshake(&self) -> &Handshake<P> {
        &self.handshake
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn status(&self) -> ConnectionStatus {
        self.handshake.status()
    }

    /// The relay connection is open and the relay has assigned an id
    pub fn is_ready(&self) -> bool {
        self.signals.is_open() && self.handshake.local_id().is_some()
    }

    /// Process one event
    ///
    /// Returns the file when an inbound transfer completes.
    pub async fn handle_event(&mut self, event: SessionEvent) -> Option<ReceivedFile> {
        let received = match event {
            SessionEvent::Relay(RelayEvent::Connect { client_id }) => {
                self.on_assigned_id(client_id);
                None
            }
            SessionEvent::Relay(RelayEvent::Signal { from, signal }) => {
                if let Err(e) = self
                    .handshake
                    .handle_signal(from.clone(), signal, &self.signals)
                    .await
                {
                    warn!("Signal from {} failed: {}", from, e);
                }
                None
            }
            SessionEvent::RelayClosed => {
                warn!("Relay connection closed");
                None
            }
            SessionEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.handshake.on_local_candidate(candidate, &self.signals) {
                    warn!("Failed to forward local candidate: {}", e);
                }
                None
            }
            SessionEvent::ChannelOpen => {
                self.handshake.on_channel_open();
                None
            }
            SessionEvent::ChannelClosed => {
                self.handshake.on_channel_closed();
                None
            }
            SessionEvent::ChannelFrame(frame) => self.on_frame(frame),
        };
        self.connect_if_pending().await;
        self.publish();
        received
    }

    fn on_assigned_id(&mut self, id: SessionId) {
        info!("Relay assigned id {}", id);
        let link = match &self.share_origin {
            Some(origin) => match share_link(origin, &id) {
                Ok(link) => Some(link),
                Err(e) => {
                    warn!("Cannot build shareable link: {}", e);
                    None
                }
            },
            None => None,
        };
        self.handshake.set_local_id(id);
        self.snapshot.send_modify(|s| s.share_link = link);
    }

    /// Start the handshake of a shared-link session the first time it is ready
    async fn connect_if_pending(&mut self) {
        if !self.auto_connect || !self.is_ready() {
            return;
        }
        self.auto_connect = false;
        if self.handshake.state() != HandshakeState::Idle {
            debug!("Handshake already started, not connecting from shared link");
            return;
        }
        if let SessionOrigin::SharedLink(peer) = self.origin.clone() {
            info!("Connecting to {} from shared link", peer);
            if let Err(e) = self.connect_to(peer).await {
                warn!("Automatic connection failed: {}", e);
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) -> Option<ReceivedFile> {
        match self.receiver.handle_frame(frame) {
            ReceiveEvent::Started(metadata) => {
                debug!("Transfer of {} started", metadata.name);
                self.snapshot.send_modify(|s| s.progress = 0.0);
                None
            }
            ReceiveEvent::Progress(percent) => {
                self.snapshot.send_modify(|s| s.progress = percent);
                None
            }
            ReceiveEvent::Completed(file) => {
                self.snapshot.send_modify(|s| s.progress = 0.0);
                Some(file)
            }
            ReceiveEvent::Ignored => None,
        }
    }

    /// Connect to a peer given as a bare id or a shareable link
    pub async fn connect_to_peer(&mut self, target: &str) -> Result<()> {
        let target = PeerTarget::parse(target)?;
        self.connect_to(target.into_id()).await
    }

    pub async fn connect_to(&mut self, remote: SessionId) -> Result<()> {
        let result = self.handshake.connect_to_peer(remote, &self.signals).await;
        self.publish();
        result
    }

    /// Send a file over the direct channel
    ///
    /// Does nothing unless the channel is open.
    pub async fn send_file<R>(&mut self, metadata: &FileMetadata, reader: R) -> Result<SendOutcome>
    where
        R: AsyncRead + Unpin,
    {
        if self.status() != ConnectionStatus::Connected {
            debug!("Not connected, not sending {}", metadata.name);
            return Ok(SendOutcome::Skipped);
        }
        let snapshot = &self.snapshot;
        let result = transfer::send_file(&self.channel, metadata, reader, |percent| {
            snapshot.send_modify(|s| s.progress = percent)
        })
        .await;
        if result.is_err() {
            self.snapshot.send_modify(|s| s.progress = 0.0);
        }
        result
    }

    /// Close the connectivity subsystem
    pub async fn close(&mut self) -> Result<()> {
        let result = self.handshake.close().await;
        self.publish();
        result
    }

    fn publish(&self) {
        let local_id = self.handshake.local_id().cloned();
        let remote_id = self.handshake.remote_id().cloned();
        let relay_open = self.signals.is_open();
        let handshake = self.handshake.state();
        let status = self.handshake.status();
        self.snapshot.send_if_modified(|s| {
            let next = SessionSnapshot {
                local_id: local_id.clone(),
                remote_id: remote_id.clone(),
                share_link: s.share_link.clone(),
                relay_open,
                handshake,
                status,
                progress: s.progress,
            };
            if *s == next {
                return false;
            }
            *s = next;
            true
        });
    }
}
