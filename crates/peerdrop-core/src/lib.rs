//! peerdrop Core - Shared types, protocols, and utilities
//!
//! This crate provides the building blocks shared by the peerdrop signaling
//! relay and the peer client: the relay and direct-channel wire formats,
//! file chunking, and the connectivity traits the client is written against.

pub mod chunk;
pub mod error;
pub mod proto;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use transport::{DataChannel, PeerConnection, SignalSink};
pub use types::*;

/// Maximum size of one binary chunk on the direct channel: 16 KB
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Label of the data channel each peer opens for file transfer
pub const DATA_CHANNEL_LABEL: &str = "fileTransfer";
