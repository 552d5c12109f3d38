#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use spex_core::protocol::frame::decode_frame;
use spex_core::protocol::{CommutatorMsg, Envelope, Message, SessionMsg};
use spex_core::ErrorCode;
use spex_transport::channel::{weak_sink, Channel, MemoryChannel, Mode, Sink};
use spex_transport::mux::{SessionMux, SessionState};
use spex_transport::obs::TransportMetrics;
use spex_transport::proxy::{FrameCodec, ProxyChannel};

use common::{frame, init_tracing, settle};

#[derive(Default)]
struct Recorder {
    got: Mutex<Vec<Envelope>>,
    closed: AtomicBool,
}

impl Recorder {
    fn received(&self) -> Vec<Envelope> {
        self.got.lock().unwrap().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Sink<Envelope> for Recorder {
    fn on_receive(&self, msg: Envelope, _timestamp: Option<u64>) {
        self.got.lock().unwrap().push(msg);
    }

    fn on_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct Rig {
    mux: Arc<SessionMux>,
    peer: Arc<MemoryChannel>,
    metrics: Arc<TransportMetrics>,
}

fn rig() -> Rig {
    init_tracing();
    let (client, peer) = MemoryChannel::pair("routing");
    peer.set_mode(Mode::Pull);
    let metrics = Arc::new(TransportMetrics::default());
    let client: Arc<dyn Channel<Bytes>> = client;
    let framed = ProxyChannel::wrap("frames", FrameCodec, client);
    let mux = SessionMux::attach("mux", framed, Arc::clone(&metrics)).unwrap();
    Rig { mux, peer, metrics }
}

async fn next_from_client(peer: &MemoryChannel) -> Envelope {
    let (data, _) = peer
        .receive(Duration::from_secs(1))
        .await
        .expect("peer received nothing");
    decode_frame(data).unwrap()
}

#[tokio::test(start_paused = true)]
async fn unknown_tunnel_is_dropped_not_delivered() {
    let rig = rig();
    let session = rig.mux.create_session(1).unwrap();
    let recorder = Arc::new(Recorder::default());
    session.attach_sink(weak_sink(&recorder));

    rig.peer.send(frame(&Envelope::tunneled(999, CommutatorMsg::TotalSlots(3))));
    rig.peer.send(frame(&Envelope::tunneled(1, CommutatorMsg::TotalSlots(4))));
    settle().await;

    let got = recorder.received();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].tunnel_id, 1);
    assert_eq!(got[0].choice, Message::Commutator(CommutatorMsg::TotalSlots(4)));
    assert_eq!(
        rig.metrics.envelopes_dropped.get(&[("reason", "unknown_tunnel")]),
        1
    );
    assert!(rig.mux.session(999).is_none());
}

#[tokio::test(start_paused = true)]
async fn outbound_envelopes_are_stamped_with_the_tunnel() {
    let rig = rig();
    let session = rig.mux.create_session(7).unwrap();

    assert!(session.send(Envelope::new(CommutatorMsg::TotalSlotsReq)));
    let env = next_from_client(&rig.peer).await;
    assert_eq!(env.tunnel_id, 7);
    assert_eq!(env.choice, Message::Commutator(CommutatorMsg::TotalSlotsReq));
}

#[tokio::test(start_paused = true)]
async fn duplicate_tunnel_is_rejected_while_active() {
    let rig = rig();
    let first = rig.mux.create_session(5).unwrap();

    let err = rig.mux.create_session(5).err().expect("duplicate must fail");
    assert_eq!(err.code(), ErrorCode::DuplicateTunnel);

    first.close();
    assert!(rig.mux.create_session(5).is_ok());
}

#[tokio::test(start_paused = true)]
async fn local_close_unregisters_then_notifies_remote() {
    let rig = rig();
    let session = rig.mux.create_session(3).unwrap();
    let recorder = Arc::new(Recorder::default());
    session.attach_sink(weak_sink(&recorder));

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(rig.mux.session(3).is_none());
    assert!(recorder.is_closed());
    assert!(!session.send(Envelope::new(CommutatorMsg::TotalSlotsReq)));

    let env = next_from_client(&rig.peer).await;
    assert_eq!(env.tunnel_id, 3);
    assert_eq!(env.choice, Message::Session(SessionMsg::Close));

    // late traffic for the id is now routed nowhere
    rig.peer.send(frame(&Envelope::tunneled(3, CommutatorMsg::TotalSlots(1))));
    settle().await;
    assert!(recorder.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn closed_ind_finalizes_the_session() {
    let rig = rig();
    let session = rig.mux.create_session(4).unwrap();
    let recorder = Arc::new(Recorder::default());
    session.attach_sink(weak_sink(&recorder));

    rig.peer.send(frame(&Envelope::tunneled(4, SessionMsg::ClosedInd)));
    settle().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(recorder.is_closed());
    assert!(recorder.received().is_empty());
    assert!(rig.mux.session(4).is_none());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_is_echoed_and_not_delivered() {
    let rig = rig();
    let session = rig.mux.create_session(8).unwrap();
    let recorder = Arc::new(Recorder::default());
    session.attach_sink(weak_sink(&recorder));

    rig.peer.send(frame(&Envelope::tunneled(8, SessionMsg::Heartbeat(42))));
    let echo = next_from_client(&rig.peer).await;
    assert_eq!(echo.tunnel_id, 8);
    assert_eq!(echo.choice, Message::Session(SessionMsg::Heartbeat(42)));
    assert!(recorder.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn envelope_timestamp_reaches_the_sink() {
    let rig = rig();
    let session = rig.mux.create_session(2).unwrap();
    let recorder = Arc::new(Recorder::default());
    session.attach_sink(weak_sink(&recorder));

    rig.peer.send(frame(
        &Envelope::tunneled(2, CommutatorMsg::TotalSlots(1)).with_timestamp(77),
    ));
    settle().await;
    assert_eq!(recorder.received()[0].timestamp, Some(77));
}

#[tokio::test(start_paused = true)]
async fn physical_close_cascades_to_every_session() {
    let rig = rig();
    let a = rig.mux.create_session(10).unwrap();
    let b = rig.mux.create_session(11).unwrap();
    let ra = Arc::new(Recorder::default());
    let rb = Arc::new(Recorder::default());
    a.attach_sink(weak_sink(&ra));
    b.attach_sink(weak_sink(&rb));

    rig.peer.close();
    settle().await;

    assert!(ra.is_closed() && rb.is_closed());
    assert_eq!(a.state(), SessionState::Closed);
    assert_eq!(b.state(), SessionState::Closed);
    assert!(rig.mux.is_empty());
    let err = rig.mux.create_session(12).err().expect("must fail");
    assert_eq!(err.code(), ErrorCode::NotConnected);
}

#[tokio::test(start_paused = true)]
async fn delivery_without_a_sink_is_dropped() {
    let rig = rig();
    let _session = rig.mux.create_session(6).unwrap();

    rig.peer.send(frame(&Envelope::tunneled(6, CommutatorMsg::TotalSlots(2))));
    settle().await;
    assert!(rig.mux.session(6).is_some());
}

#[tokio::test(start_paused = true)]
async fn granted_tunnel_holds_traffic_until_claimed() {
    let rig = rig();
    let control = rig.mux.create_session(5).unwrap();
    let control_rx = Arc::new(Recorder::default());
    control.attach_sink(weak_sink(&control_rx));

    rig.peer.send(frame(&Envelope::tunneled(5, CommutatorMsg::OpenTunnelReport(40))));
    rig.peer.send(frame(&Envelope::tunneled(40, CommutatorMsg::TotalSlots(1))));
    rig.peer.send(frame(&Envelope::tunneled(40, CommutatorMsg::TotalSlots(2))));
    settle().await;

    assert_eq!(control_rx.received().len(), 1);
    assert_eq!(
        rig.metrics.envelopes_dropped.get(&[("reason", "unknown_tunnel")]),
        0
    );

    let tunnel = rig.mux.claim_session(40).unwrap();
    let recorder = Arc::new(Recorder::default());
    tunnel.attach_sink(weak_sink(&recorder));
    let got: Vec<Message> = recorder.received().into_iter().map(|e| e.choice).collect();
    assert_eq!(
        got,
        vec![
            Message::Commutator(CommutatorMsg::TotalSlots(1)),
            Message::Commutator(CommutatorMsg::TotalSlots(2)),
        ]
    );

    rig.peer.send(frame(&Envelope::tunneled(40, CommutatorMsg::TotalSlots(3))));
    settle().await;
    assert_eq!(recorder.received().len(), 3);

    let err = rig.mux.claim_session(40).err().expect("second claim must fail");
    assert_eq!(err.code(), ErrorCode::DuplicateTunnel);
}

#[tokio::test(start_paused = true)]
async fn unclaimed_grants_close_with_their_control_session() {
    let rig = rig();
    let control = rig.mux.create_session(5).unwrap();

    rig.peer.send(frame(&Envelope::tunneled(5, CommutatorMsg::OpenTunnelReport(41))));
    settle().await;
    let granted = rig.mux.session(41).expect("grant is bound on arrival");

    control.close();
    assert!(rig.mux.session(41).is_none());
    assert_eq!(granted.state(), SessionState::Closed);

    let mut closed = Vec::new();
    for _ in 0..2 {
        let env = next_from_client(&rig.peer).await;
        assert_eq!(env.choice, Message::Session(SessionMsg::Close));
        closed.push(env.tunnel_id);
    }
    closed.sort_unstable();
    assert_eq!(closed, vec![5, 41]);
}
