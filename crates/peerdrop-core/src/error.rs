//! Error types for peerdrop

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("No relay connection is open")]
    RelayUnavailable,

    #[error("Direct channel is not open")]
    ChannelClosed,

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
