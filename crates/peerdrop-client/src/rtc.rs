//! WebRTC backend for the connectivity traits
//!
//! Each side creates its own ordered `fileTransfer` data channel and sends
//! on it; frames from the channel the remote side opened arrive through
//! `on_data_channel`. All callbacks are turned into [`SessionEvent`]s.

use crate::config::Config;
use crate::session::SessionEvent;
use bytes::Bytes;
use peerdrop_core::proto::{Frame, IceCandidate, SdpType, SessionDescription};
use peerdrop_core::{DataChannel, Error, PeerConnection, Result, DATA_CHANNEL_LABEL};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

type Events = mpsc::UnboundedSender<SessionEvent>;

fn rtc_err(e: webrtc::Error) -> Error {
    Error::Connectivity(e.to_string())
}

pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

pub struct RtcChannel {
    dc: Arc<RTCDataChannel>,
}

/// Build the peer connection and this side's data channel
pub async fn create(config: &Config, events: Events) -> Result<(RtcPeer, RtcChannel)> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().map_err(rtc_err)?;
    let registry =
        register_default_interceptors(Registry::new(), &mut media_engine).map_err(rtc_err)?;
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };
    let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(rtc_err)?);

    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            let candidate = match candidate.map(|c| c.to_json()).transpose() {
                Ok(init) => init.map(from_init),
                Err(e) => {
                    warn!("Cannot encode local candidate: {}", e);
                    return;
                }
            };
            let _ = tx.send(SessionEvent::LocalCandidate(candidate));
        })
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        Box::pin(async move {
            debug!("Peer connection state: {}", state);
        })
    }));

    let tx = events.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let tx = tx.clone();
        Box::pin(async move {
            debug!("Remote opened data channel '{}'", dc.label());
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                let tx = tx.clone();
                Box::pin(async move {
                    if let Some(frame) = to_frame(msg) {
                        let _ = tx.send(SessionEvent::ChannelFrame(frame));
                    }
                })
            }));
        })
    }));

    let dc = pc
        .create_data_channel(
            DATA_CHANNEL_LABEL,
            Some(RTCDataChannelInit {
                ordered: Some(true),
                ..Default::default()
            }),
        )
        .await
        .map_err(rtc_err)?;

    let tx = events.clone();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            let _ = tx.send(SessionEvent::ChannelOpen);
        })
    }));
    let tx = events;
    dc.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(SessionEvent::ChannelClosed);
        })
    }));

    Ok((RtcPeer { pc }, RtcChannel { dc }))
}

fn to_frame(msg: DataChannelMessage) -> Option<Frame> {
    if !msg.is_string {
        return Some(Frame::Binary(msg.data));
    }
    match String::from_utf8(msg.data.to_vec()) {
        Ok(text) => Some(Frame::Text(text)),
        Err(e) => {
            warn!("Dropping non-UTF-8 text frame: {}", e);
            None
        }
    }
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(rtc_err)
}

impl PeerConnection for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.map_err(rtc_err)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await.map_err(rtc_err)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(rtc_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(rtc_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_init(candidate))
            .await
            .map_err(rtc_err)
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.map_err(rtc_err)
    }
}

impl RtcChannel {
    /// Wait until queued frames have left the local buffer
    pub async fn wait_for_drain(&self) {
        for _ in 0..500 {
            if !self.is_open() || self.dc.buffered_amount().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl DataChannel for RtcChannel {
    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.dc.send_text(text).await.map(|_| ()).map_err(rtc_err)
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        self.dc.send(&data).await.map(|_| ()).map_err(rtc_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_becomes_text_frame() {
        let msg = DataChannelMessage {
            is_string: true,
            data: Bytes::from_static(br#"{"type":"complete"}"#),
        };
        assert_eq!(
            to_frame(msg),
            Some(Frame::Text(r#"{"type":"complete"}"#.to_string()))
        );
    }

    #[test]
    fn test_binary_message_becomes_binary_frame() {
        let msg = DataChannelMessage {
            is_string: false,
            data: Bytes::from_static(&[0xff, 0x00, 0x10]),
        };
        assert_eq!(
            to_frame(msg),
            Some(Frame::Binary(Bytes::from_static(&[0xff, 0x00, 0x10])))
        );
    }

    #[test]
    fn test_invalid_utf8_text_is_dropped() {
        let msg = DataChannelMessage {
            is_string: true,
            data: Bytes::from_static(&[0xff, 0xfe]),
        };
        assert_eq!(to_frame(msg), None);
    }

    #[test]
    fn test_candidate_roundtrip() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".to_string()),
        };

        let init = to_init(candidate.clone());
        assert_eq!(init.candidate, candidate.candidate);
        assert_eq!(init.sdp_mline_index, Some(0));
        assert_eq!(from_init(init), candidate);
    }

    #[test]
    fn test_unparseable_sdp_is_rejected() {
        let result = to_rtc(SessionDescription::offer("not sdp"));
        assert!(matches!(result, Err(Error::Connectivity(_))));
    }
}
