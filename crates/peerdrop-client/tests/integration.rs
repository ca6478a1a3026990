//! End-to-end tests: two sessions signaling through a real relay
//!
//! The connectivity subsystem and the direct channel are mocks; frames the
//! sender puts on its channel are handed to the receiving session by the
//! test.

use peerdrop_client::{
    share_link, HandshakeState, Integrity, PeerTarget, RelayLink, SendOutcome,
    SessionController, SessionEvent, SessionOrigin, SessionSnapshot,
};
use peerdrop_core::proto::{IceCandidate, SessionDescription, SignalPayload};
use peerdrop_core::transport::mock::{MockDataChannel, MockPeerConnection, PeerCall};
use peerdrop_core::{ConnectionStatus, FileMetadata, SignalSink};
use peerdrop_relay::{RelayConfig, RelayServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Session = SessionController<Arc<MockPeerConnection>, Arc<MockDataChannel>, RelayLink>;

struct Peer {
    session: Session,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    pc: Arc<MockPeerConnection>,
    channel: Arc<MockDataChannel>,
}

async fn start_relay() -> String {
    let config = RelayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let server = RelayServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    format!("ws://{}", addr)
}

async fn join(url: &str, origin: SessionOrigin) -> Peer {
    let (tx, events) = mpsc::unbounded_channel();
    let link = RelayLink::connect(url, tx).await.unwrap();
    let pc = Arc::new(MockPeerConnection::new());
    let channel = Arc::new(MockDataChannel::new());
    let session = SessionController::new(origin, pc.clone(), channel.clone(), link)
        .with_share_origin("http://localhost:3000");
    Peer {
        session,
        events,
        pc,
        channel,
    }
}

/// Process relay events until the snapshot satisfies `done`
async fn pump_until(peer: &mut Peer, done: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
    loop {
        let snapshot = peer.session.snapshot();
        if done(&snapshot) {
            return snapshot;
        }
        let event = tokio::time::timeout(Duration::from_secs(2), peer.events.recv())
            .await
            .expect("timed out waiting for relay")
            .expect("event channel closed");
        peer.session.handle_event(event).await;
    }
}

async fn open_channels(a: &mut Peer, b: &mut Peer) {
    a.channel.set_open(true);
    b.channel.set_open(true);
    a.session.handle_event(SessionEvent::ChannelOpen).await;
    b.session.handle_event(SessionEvent::ChannelOpen).await;
}

/// B shares its link, A opens it; returns (A, B) after offer and answer
async fn handshake_via_link(url: &str) -> (Peer, Peer) {
    let mut b = join(url, SessionOrigin::Direct).await;
    let b_snapshot = pump_until(&mut b, |s| s.local_id.is_some()).await;
    let link = b_snapshot.share_link.unwrap();
    assert_eq!(
        link,
        share_link("http://localhost:3000", b_snapshot.local_id.as_ref().unwrap()).unwrap()
    );

    let target = PeerTarget::parse(&link).unwrap().into_id();
    let mut a = join(url, SessionOrigin::SharedLink(target)).await;
    pump_until(&mut a, |s| s.handshake == HandshakeState::AwaitingRemoteAnswer).await;
    pump_until(&mut b, |s| s.handshake == HandshakeState::RemoteDescriptionSet).await;
    pump_until(&mut a, |s| s.handshake == HandshakeState::RemoteDescriptionSet).await;
    (a, b)
}

#[tokio::test]
async fn test_offer_answer_through_relay() {
    let url = start_relay().await;
    let (a, b) = handshake_via_link(&url).await;

    let a_id = a.session.snapshot().local_id.unwrap();
    let b_id = b.session.snapshot().local_id.unwrap();
    assert_ne!(a_id, b_id);
    assert_eq!(a.session.snapshot().remote_id, Some(b_id));
    assert_eq!(b.session.snapshot().remote_id, Some(a_id));

    assert_eq!(
        b.pc.calls()[0],
        PeerCall::SetRemote(SessionDescription::offer(MockPeerConnection::OFFER_SDP))
    );
    assert_eq!(
        a.pc.calls().last(),
        Some(&PeerCall::SetRemote(SessionDescription::answer(
            MockPeerConnection::ANSWER_SDP
        )))
    );
}

#[tokio::test]
async fn test_candidates_are_relayed() {
    let url = start_relay().await;
    let (mut a, mut b) = handshake_via_link(&url).await;

    let candidate = IceCandidate {
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        ..IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 5000 typ host")
    };
    a.session
        .handle_event(SessionEvent::LocalCandidate(Some(candidate.clone())))
        .await;
    a.session.handle_event(SessionEvent::LocalCandidate(None)).await;

    let expected = PeerCall::AddCandidate(candidate);
    let calls_before = b.pc.calls().len();
    // The candidate and the end marker both arrive; only the first reaches the subsystem
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(2), b.events.recv())
            .await
            .unwrap()
            .unwrap();
        b.session.handle_event(event).await;
    }
    let calls = b.pc.calls();
    assert_eq!(calls.len(), calls_before + 1);
    assert_eq!(calls.last(), Some(&expected));
    assert_eq!(b.session.snapshot().handshake, HandshakeState::RemoteDescriptionSet);

    open_channels(&mut a, &mut b).await;
    assert_eq!(a.session.status(), ConnectionStatus::Connected);
    assert_eq!(b.session.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_file_transfer_end_to_end() {
    let url = start_relay().await;
    let (mut a, mut b) = handshake_via_link(&url).await;
    open_channels(&mut a, &mut b).await;

    let data: Vec<u8> = (0..40000u32).map(|i| (i % 256) as u8).collect();
    let metadata = FileMetadata::new("photo.png", 40000, "image/png");
    let outcome = a.session.send_file(&metadata, &data[..]).await.unwrap();
    assert_eq!(
        outcome,
        SendOutcome::Sent {
            bytes: 40000,
            chunks: 3
        }
    );

    let mut received = None;
    for frame in a.channel.take_frames() {
        if let Some(file) = b.session.handle_event(SessionEvent::ChannelFrame(frame)).await {
            received = Some(file);
        }
    }

    let file = received.expect("transfer completed");
    assert_eq!(file.name, "photo.png");
    assert_eq!(file.mime_type, "image/png");
    assert_eq!(file.data.as_ref(), data.as_slice());
    assert_eq!(file.integrity(), Integrity::Verified);
    assert_eq!(b.session.snapshot().progress, 0.0);

    let dir = tempfile::TempDir::new().unwrap();
    let path = file.save_to(dir.path()).await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), data);
}

#[tokio::test]
async fn test_unknown_peer_gets_no_answer() {
    let url = start_relay().await;
    let mut a = join(&url, SessionOrigin::SharedLink("ghost".into())).await;

    let snapshot =
        pump_until(&mut a, |s| s.handshake == HandshakeState::AwaitingRemoteAnswer).await;
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);

    // The relay drops the offer; nothing comes back
    let event = tokio::time::timeout(Duration::from_millis(300), a.events.recv()).await;
    assert!(event.is_err());
    assert_eq!(a.session.snapshot().handshake, HandshakeState::AwaitingRemoteAnswer);
}

#[tokio::test]
async fn test_closed_relay_link_refuses_signals() {
    let url = start_relay().await;
    let (tx, mut events) = mpsc::unbounded_channel();
    let link = RelayLink::connect(&url, tx).await.unwrap();
    assert!(link.is_open());

    let first = events.recv().await.unwrap();
    assert!(matches!(first, SessionEvent::Relay(_)));

    link.close();
    assert!(!link.is_open());
    let signal = SignalPayload::Candidate { candidate: None };
    assert!(link.send_signal(&"xyz789".into(), signal).is_err());
}

#[tokio::test]
async fn test_relay_unreachable() {
    let (tx, _events) = mpsc::unbounded_channel();
    let result = RelayLink::connect("ws://127.0.0.1:1", tx).await;
    assert!(matches!(
        result,
        Err(peerdrop_core::Error::ConnectionFailed(_))
    ));
}
