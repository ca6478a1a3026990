//! Wire message definitions
//!
//! Two protocols live here. The relay protocol is JSON text frames over a
//! WebSocket between each client and the signaling relay. The direct-channel
//! protocol is JSON text frames for control messages interleaved with raw
//! binary frames for file data, carried on the peer-to-peer data channel.

use crate::{Error, FileMetadata, Result, SessionId, DEFAULT_MIME_TYPE};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

// Relay protocol

/// Message a client sends to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayRequest {
    Signal { to: SessionId, signal: SignalPayload },
}

/// Message the relay sends to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayEvent {
    /// Sent once, right after the connection is accepted
    Connect {
        #[serde(rename = "clientId")]
        client_id: SessionId,
    },
    /// A signal forwarded from another client
    Signal { from: SessionId, signal: SignalPayload },
}

/// Session negotiation payload carried inside a relay signal
///
/// Offers and answers use the same shape as a browser's
/// `RTCSessionDescription` JSON so either end can be a browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    /// `None` marks the end of candidate gathering
    Candidate { candidate: Option<IceCandidate> },
}

/// An ICE candidate in its browser JSON form (`RTCIceCandidateInit`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }

    /// Browsers signal end-of-candidates with an empty candidate string
    pub fn is_empty(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

/// A local or remote session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

impl From<SessionDescription> for SignalPayload {
    fn from(desc: SessionDescription) -> Self {
        match desc.sdp_type {
            SdpType::Offer => SignalPayload::Offer { sdp: desc.sdp },
            SdpType::Answer => SignalPayload::Answer { sdp: desc.sdp },
        }
    }
}

impl RelayRequest {
    pub fn signal(to: SessionId, signal: SignalPayload) -> Self {
        RelayRequest::Signal { to, signal }
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl RelayEvent {
    pub fn connect(client_id: SessionId) -> Self {
        RelayEvent::Connect { client_id }
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Loosely-typed view of a frame received by the relay
///
/// The relay never interprets the signal payload, so it is kept as raw JSON
/// text and forwarded without being re-serialized.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub to: Option<SessionId>,
    #[serde(default)]
    pub signal: Option<Box<RawValue>>,
}

impl InboundFrame {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn is_signal(&self) -> bool {
        self.kind == "signal"
    }
}

/// Signal frame as the relay rewrites it for the recipient
#[derive(Debug, Serialize)]
pub struct ForwardedSignal<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    from: &'a SessionId,
    signal: &'a RawValue,
}

impl<'a> ForwardedSignal<'a> {
    pub fn new(from: &'a SessionId, signal: &'a RawValue) -> Self {
        Self {
            kind: "signal",
            from,
            signal,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// Direct-channel protocol

/// Control message on the direct channel, always sent as a text frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelMessage {
    Metadata {
        name: String,
        size: u64,
        #[serde(rename = "fileType", default)]
        file_type: String,
    },
    Complete,
    /// Any kind this version does not know; ignored by the receiver
    #[serde(other, skip_serializing)]
    Unknown,
}

impl ChannelMessage {
    pub fn metadata(metadata: &FileMetadata) -> Self {
        ChannelMessage::Metadata {
            name: metadata.name.clone(),
            size: metadata.size,
            file_type: metadata.mime_type.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Metadata carried by a `metadata` message
    ///
    /// An empty declared type falls back to `application/octet-stream`.
    pub fn into_metadata(self) -> Option<FileMetadata> {
        match self {
            ChannelMessage::Metadata {
                name,
                size,
                file_type,
            } => {
                let mime_type = if file_type.is_empty() {
                    DEFAULT_MIME_TYPE.to_string()
                } else {
                    file_type
                };
                Some(FileMetadata::new(name, size, mime_type))
            }
            _ => None,
        }
    }
}

/// One frame on the direct channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Encode a control message as a text frame
    pub fn message(msg: &ChannelMessage) -> Result<Self> {
        if matches!(msg, ChannelMessage::Unknown) {
            return Err(Error::Protocol("cannot send an unknown message".to_string()));
        }
        Ok(Frame::Text(msg.to_json()?))
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
