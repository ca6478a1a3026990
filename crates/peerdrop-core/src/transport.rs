//! Connectivity abstractions
//!
//! The peer client is written against three traits rather than a concrete
//! WebRTC stack, allowing for:
//! - A real WebRTC backend in production
//! - Mock implementations for testing
//!
//! `SignalSink` is the outbound half of the relay connection,
//! `PeerConnection` is the connectivity-establishment subsystem (offer/answer
//! and ICE), and `DataChannel` is the ordered, reliable direct channel.

use crate::proto::{Frame, IceCandidate, SessionDescription, SignalPayload};
use crate::{Result, SessionId};
use bytes::Bytes;
use std::sync::Arc;

/// Outbound side of the relay connection
pub trait SignalSink: Send + Sync {
    /// Queue a signal for the relay to forward to `to`
    ///
    /// Delivery is fire-and-forget: the relay silently drops signals for
    /// ids it does not know.
    fn send_signal(&self, to: &SessionId, signal: SignalPayload) -> Result<()>;

    /// Whether the relay connection is currently open
    fn is_open(&self) -> bool;
}

/// Connectivity-establishment subsystem
///
/// Implementations must buffer candidates that arrive before a remote
/// description is set.
#[allow(async_fn_in_trait)]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// The direct channel file data flows over
#[allow(async_fn_in_trait)]
pub trait DataChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<()>;

    async fn send_binary(&self, data: Bytes) -> Result<()>;

    async fn send_frame(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Text(text) => self.send_text(text).await,
            Frame::Binary(data) => self.send_binary(data).await,
        }
    }
}

impl<T: SignalSink + ?Sized> SignalSink for Arc<T> {
    fn send_signal(&self, to: &SessionId, signal: SignalPayload) -> Result<()> {
        (**self).send_signal(to, signal)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

impl<T: PeerConnection> PeerConnection for Arc<T> {
    async fn create_offer(&self) -> Result<SessionDescription> {
        (**self).create_offer().await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        (**self).create_answer().await
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        (**self).set_local_description(desc).await
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        (**self).set_remote_description(desc).await
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        (**self).add_ice_candidate(candidate).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

impl<T: DataChannel> DataChannel for Arc<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    async fn send_text(&self, text: String) -> Result<()> {
        (**self).send_text(text).await
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        (**self).send_binary(data).await
    }
}

pub mod mock {
    //! Mock connectivity for testing and development

    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// A mock relay connection that records outgoing signals
    pub struct MockSignalSink {
        open: AtomicBool,
        sent: Mutex<Vec<(SessionId, SignalPayload)>>,
    }

    impl MockSignalSink {
        /// Create an open mock relay connection
        pub fn new() -> Self {
            Self {
                open: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
            }
        }

        /// Create a mock relay connection that is already closed
        pub fn closed() -> Self {
            let sink = Self::new();
            sink.set_open(false);
            sink
        }

        pub fn set_open(&self, open: bool) {
            self.open.store(open, Ordering::SeqCst);
        }

        /// Get all sent signals
        pub fn sent(&self) -> Vec<(SessionId, SignalPayload)> {
            self.sent.lock().unwrap().clone()
        }

        /// Drain all sent signals
        pub fn take_sent(&self) -> Vec<(SessionId, SignalPayload)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Default for MockSignalSink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SignalSink for MockSignalSink {
        fn send_signal(&self, to: &SessionId, signal: SignalPayload) -> Result<()> {
            if !self.is_open() {
                return Err(Error::RelayUnavailable);
            }
            self.sent.lock().unwrap().push((to.clone(), signal));
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    /// A call made on [`MockPeerConnection`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum PeerCall {
        CreateOffer,
        CreateAnswer,
        SetLocal(SessionDescription),
        SetRemote(SessionDescription),
        AddCandidate(IceCandidate),
        Close,
    }

    /// A mock connectivity subsystem that records calls
    pub struct MockPeerConnection {
        calls: Mutex<Vec<PeerCall>>,
        reject_remote: AtomicBool,
    }

    impl MockPeerConnection {
        pub const OFFER_SDP: &'static str = "mock-offer-sdp";
        pub const ANSWER_SDP: &'static str = "mock-answer-sdp";

        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reject_remote: AtomicBool::new(false),
            }
        }

        /// Make every `set_remote_description` fail
        pub fn reject_remote_descriptions(&self) {
            self.reject_remote.store(true, Ordering::SeqCst);
        }

        /// Get all calls made so far
        pub fn calls(&self) -> Vec<PeerCall> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: PeerCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Default for MockPeerConnection {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PeerConnection for MockPeerConnection {
        async fn create_offer(&self) -> Result<SessionDescription> {
            self.record(PeerCall::CreateOffer);
            Ok(SessionDescription::offer(Self::OFFER_SDP))
        }

        async fn create_answer(&self) -> Result<SessionDescription> {
            self.record(PeerCall::CreateAnswer);
            Ok(SessionDescription::answer(Self::ANSWER_SDP))
        }

        async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
            self.record(PeerCall::SetLocal(desc));
            Ok(())
        }

        async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
            self.record(PeerCall::SetRemote(desc));
            if self.reject_remote.load(Ordering::SeqCst) {
                return Err(Error::Connectivity(
                    "remote description rejected".to_string(),
                ));
            }
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
            self.record(PeerCall::AddCandidate(candidate));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.record(PeerCall::Close);
            Ok(())
        }
    }

    /// A mock direct channel that records sent frames
    pub struct MockDataChannel {
        open: AtomicBool,
        frames: Mutex<Vec<Frame>>,
    }

    impl MockDataChannel {
        /// Create a channel that is not open yet
        pub fn new() -> Self {
            Self {
                open: AtomicBool::new(false),
                frames: Mutex::new(Vec::new()),
            }
        }

        /// Create a channel that is already open
        pub fn open() -> Self {
            let channel = Self::new();
            channel.set_open(true);
            channel
        }

        pub fn set_open(&self, open: bool) {
            self.open.store(open, Ordering::SeqCst);
        }

        /// Get all frames sent so far
        pub fn frames(&self) -> Vec<Frame> {
            self.frames.lock().unwrap().clone()
        }

        /// Drain all frames sent so far
        pub fn take_frames(&self) -> Vec<Frame> {
            std::mem::take(&mut *self.frames.lock().unwrap())
        }

        fn push(&self, frame: Frame) -> Result<()> {
            if !self.is_open() {
                return Err(Error::ChannelClosed);
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    impl Default for MockDataChannel {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DataChannel for MockDataChannel {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send_text(&self, text: String) -> Result<()> {
            self.push(Frame::Text(text))
        }

        async fn send_binary(&self, data: Bytes) -> Result<()> {
            self.push(Frame::Binary(data))
        }
    }

}
