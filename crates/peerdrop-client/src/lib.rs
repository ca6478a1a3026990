//! peerdrop Client Library
//!
//! This library provides the peer side of peerdrop: the handshake that turns
//! relayed signals into a direct channel, the chunked transfer engine, and
//! the session controller that ties them to a relay connection.

pub mod config;
pub mod handshake;
pub mod link;
pub mod relay;
#[cfg(feature = "webrtc")]
pub mod rtc;
pub mod session;
pub mod transfer;

pub use config::Config;
pub use handshake::{Handshake, HandshakeState, Role};
pub use link::{share_link, PeerTarget};
pub use relay::RelayLink;
pub use session::{SessionController, SessionEvent, SessionOrigin, SessionSnapshot};
pub use transfer::{send_file, Integrity, ReceivedFile, SendOutcome, TransferReceiver};
