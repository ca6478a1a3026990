//! Core data types for peerdrop

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Length of a generated session id
pub const SESSION_ID_LEN: usize = 9;

/// MIME type used when nothing better is known
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Identifier the relay assigns to one connected client
///
/// Only used for addressing signaling messages. It is not a secret and
/// grants nothing: anyone who knows it can send an offer to its holder.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a SessionId from an already-validated string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random lowercase alphanumeric id of the given length
    ///
    /// Uniqueness is not guaranteed here; the relay registry checks for
    /// collisions and asks for another one.
    pub fn generate(len: usize) -> Result<Self> {
        let mut id = String::with_capacity(len);
        let mut buf = [0u8; 32];
        while id.len() < len {
            getrandom::getrandom(&mut buf)
                .map_err(|e| Error::Protocol(format!("random source failed: {}", e)))?;
            // 252 = 36 * 7, rejecting the rest keeps the distribution uniform
            for b in buf.iter().filter(|b| **b < 252) {
                if id.len() == len {
                    break;
                }
                id.push(ID_ALPHABET[(*b % 36) as usize] as char);
            }
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidSessionId("empty id".to_string()));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(Error::InvalidSessionId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Metadata announced by the sender before any chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Original filename
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Declared MIME type
    pub mime_type: String,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }

    /// Build metadata for a file on disk, guessing the type from its extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Protocol(format!("invalid file name: {}", path.display())))?
            .to_string();

        Ok(Self {
            name,
            size,
            mime_type: detect_mime_type(path),
        })
    }
}

/// Guess a MIME type from a path's extension
pub fn detect_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Externally observable state of the direct channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Byte progress of one transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub transferred: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(transferred: u64, total: u64) -> Self {
        Self { transferred, total }
    }

    /// Percentage in `0.0..=100.0`
    ///
    /// An empty file counts as fully transferred.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.transferred as f64 / self.total as f64) * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.transferred >= self.total
    }
}
