//! peerdrop Relay - signaling relay server
//!
//! Assigns each WebSocket client a session id and forwards addressed
//! signaling messages between clients. File data never passes through here.

pub mod config;
pub mod registry;
pub mod server;

pub use config::RelayConfig;
pub use registry::{ClientHandle, Registry};
pub use server::{route, RelayServer, Route};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("No free session id after {0} attempts")]
    IdsExhausted(usize),

    #[error(transparent)]
    Core(#[from] peerdrop_core::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
