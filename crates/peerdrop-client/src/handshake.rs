//! Handshake state machine
//!
//! Turns relayed signals into an established direct channel. The side that
//! knows its peer's id sends the offer; the other side answers whoever
//! offers first. ICE candidates trickle in both directions alongside.
//!
//! ```text
//! Idle -> LocalOfferCreated -> LocalDescriptionSet -> AwaitingRemoteAnswer
//!      -> RemoteDescriptionSet -> Connected -> Closed
//! ```
//!
//! The answering side goes straight from `Idle` to `RemoteDescriptionSet`.
//! There is no retry: any failure leaves the handshake `Closed`.

use peerdrop_core::proto::{IceCandidate, SessionDescription, SignalPayload};
use peerdrop_core::{ConnectionStatus, Error, PeerConnection, Result, SessionId, SignalSink};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Idle,
    LocalOfferCreated,
    LocalDescriptionSet,
    AwaitingRemoteAnswer,
    RemoteDescriptionSet,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sent the offer
    Initiator,
    /// Answered an incoming offer
    Responder,
}

/// Per-session handshake driver
pub struct Handshake<P> {
    peer: P,
    state: HandshakeState,
    role: Option<Role>,
    local_id: Option<SessionId>,
    remote_id: Option<SessionId>,
}

impl<P: PeerConnection> Handshake<P> {
    pub fn new(peer: P) -> Self {
        Self {
            peer,
            state: HandshakeState::Idle,
            role: None,
            local_id: None,
            remote_id: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn local_id(&self) -> Option<&SessionId> {
        self.local_id.as_ref()
    }

    pub fn remote_id(&self) -> Option<&SessionId> {
        self.remote_id.as_ref()
    }

    /// Record the id the relay assigned to this session
    pub fn set_local_id(&mut self, id: SessionId) {
        self.local_id = Some(id);
    }

    pub fn peer(&self) -> &P {
        &self.peer
    }

    /// Status shown to the user and used to gate transfers
    pub fn status(&self) -> ConnectionStatus {
        if self.state == HandshakeState::Connected {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Start a handshake by offering a connection to `remote`
    pub async fn connect_to_peer<S: SignalSink>(
        &mut self,
        remote: SessionId,
        signals: &S,
    ) -> Result<()> {
        if !signals.is_open() {
            warn!("Cannot connect to {}: relay connection is not open", remote);
            self.state = HandshakeState::Closed;
            return Err(Error::RelayUnavailable);
        }
        if self.state != HandshakeState::Idle {
            return Err(Error::Protocol(format!(
                "cannot connect to {} from state {:?}",
                remote, self.state
            )));
        }

        self.role = Some(Role::Initiator);
        self.remote_id = Some(remote.clone());

        let result = self.send_offer(&remote, signals).await;
        if let Err(e) = &result {
            warn!("Offer to {} failed: {}", remote, e);
            self.state = HandshakeState::Closed;
        }
        result
    }

    async fn send_offer<S: SignalSink>(&mut self, remote: &SessionId, signals: &S) -> Result<()> {
        let offer = self.peer.create_offer().await?;
        self.state = HandshakeState::LocalOfferCreated;

        self.peer.set_local_description(offer.clone()).await?;
        self.state = HandshakeState::LocalDescriptionSet;

        signals.send_signal(remote, offer.into())?;
        self.state = HandshakeState::AwaitingRemoteAnswer;

        info!("Sent offer to {}", remote);
        Ok(())
    }

    /// Apply a signal forwarded by the relay
    pub async fn handle_signal<S: SignalSink>(
        &mut self,
        from: SessionId,
        signal: SignalPayload,
        signals: &S,
    ) -> Result<()> {
        match signal {
            SignalPayload::Offer { sdp } => self.handle_offer(from, sdp, signals).await,
            SignalPayload::Answer { sdp } => self.handle_answer(from, sdp).await,
            SignalPayload::Candidate { candidate } => self.handle_candidate(candidate).await,
        }
    }

    async fn handle_offer<S: SignalSink>(
        &mut self,
        from: SessionId,
        sdp: String,
        signals: &S,
    ) -> Result<()> {
        if self.state != HandshakeState::Idle {
            warn!("Offer from {} received in state {:?}", from, self.state);
        }
        info!("Received offer from {}", from);

        self.role = Some(Role::Responder);
        self.remote_id = Some(from.clone());

        let result = self.answer(&from, sdp, signals).await;
        if let Err(e) = &result {
            warn!("Answering {} failed: {}", from, e);
            self.state = HandshakeState::Closed;
        }
        result
    }

    async fn answer<S: SignalSink>(
        &mut self,
        from: &SessionId,
        sdp: String,
        signals: &S,
    ) -> Result<()> {
        self.peer
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.state = HandshakeState::RemoteDescriptionSet;

        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer.clone()).await?;
        signals.send_signal(from, answer.into())?;

        info!("Sent answer to {}", from);
        Ok(())
    }

    async fn handle_answer(&mut self, from: SessionId, sdp: String) -> Result<()> {
        if self.state != HandshakeState::AwaitingRemoteAnswer {
            warn!("Answer from {} received in state {:?}", from, self.state);
        }
        if self.remote_id.as_ref() != Some(&from) {
            warn!(
                "Answer from {} but offer went to {:?}",
                from, self.remote_id
            );
        }

        match self
            .peer
            .set_remote_description(SessionDescription::answer(sdp))
            .await
        {
            Ok(()) => {
                if self.state == HandshakeState::AwaitingRemoteAnswer {
                    self.state = HandshakeState::RemoteDescriptionSet;
                }
                info!("Applied answer from {}", from);
                Ok(())
            }
            Err(e) => {
                self.state = HandshakeState::Closed;
                Err(e)
            }
        }
    }

    async fn handle_candidate(&mut self, candidate: Option<IceCandidate>) -> Result<()> {
        match candidate {
            Some(candidate) if !candidate.is_empty() => {
                debug!("Adding remote candidate {}", candidate.candidate);
                self.peer.add_ice_candidate(candidate).await
            }
            _ => {
                debug!("Remote end of candidates");
                Ok(())
            }
        }
    }

    /// Forward a candidate discovered locally to the remote peer
    ///
    /// `None` is the end-of-candidates marker and is forwarded as well.
    pub fn on_local_candidate<S: SignalSink>(
        &self,
        candidate: Option<IceCandidate>,
        signals: &S,
    ) -> Result<()> {
        match &self.remote_id {
            Some(remote) => signals.send_signal(remote, SignalPayload::Candidate { candidate }),
            None => {
                debug!("No remote peer yet, dropping local candidate");
                Ok(())
            }
        }
    }

    pub fn on_channel_open(&mut self) {
        info!("Direct channel open");
        self.state = HandshakeState::Connected;
    }

    pub fn on_channel_closed(&mut self) {
        info!("Direct channel closed");
        self.state = HandshakeState::Closed;
    }

    /// Tear down the connectivity subsystem
    pub async fn close(&mut self) -> Result<()> {
        self.state = HandshakeState::Closed;
        self.peer.close().await
    }
}
