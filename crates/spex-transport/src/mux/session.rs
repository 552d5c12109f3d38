use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use spex_core::protocol::{Envelope, SessionMsg};

use super::SessionMux;
use crate::channel::{lock, Channel, Mode, Sink, SinkSlot};

/// Envelopes held for a granted session until its first sink attaches.
const EARLY_LIMIT: usize = 64;

/// Lifecycle of a logical session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Active = 0,
    Closing = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Active,
            1 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// One logical stream bound to a tunnel id.
pub struct Session {
    tunnel_id: u32,
    state: AtomicU8,
    mux: Weak<SessionMux>,
    downlevel: Arc<dyn Channel<Envelope>>,
    sink: SinkSlot<Envelope>,
    /// Session whose `open_tunnel_report` granted this one, until claimed.
    origin: Option<u32>,
    claimed: AtomicBool,
    early: Mutex<Option<VecDeque<(Envelope, Option<u64>)>>>,
}

impl Session {
    pub(super) fn new(tunnel_id: u32, mux: Weak<SessionMux>, downlevel: Arc<dyn Channel<Envelope>>) -> Self {
        Self {
            tunnel_id,
            state: AtomicU8::new(SessionState::Active as u8),
            mux,
            downlevel,
            sink: SinkSlot::new(format!("session#{tunnel_id}")),
            origin: None,
            claimed: AtomicBool::new(true),
            early: Mutex::new(None),
        }
    }

    /// Bound as soon as the grant is routed, ahead of its claimant.
    pub(super) fn granted(
        tunnel_id: u32,
        origin: u32,
        mux: Weak<SessionMux>,
        downlevel: Arc<dyn Channel<Envelope>>,
    ) -> Self {
        Self {
            origin: Some(origin),
            claimed: AtomicBool::new(false),
            early: Mutex::new(Some(VecDeque::new())),
            ..Self::new(tunnel_id, mux, downlevel)
        }
    }

    /// First claim wins.
    pub(super) fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    pub(super) fn is_unclaimed_grant_of(&self, origin: u32) -> bool {
        self.origin == Some(origin) && !self.claimed.load(Ordering::Acquire)
    }

    pub fn tunnel_id(&self) -> u32 {
        self.tunnel_id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` if that is forward; returns whether it moved.
    fn advance(&self, to: SessionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur < to as u8).then_some(to as u8)
            })
            .is_ok()
    }

    pub(super) fn deliver(&self, env: Envelope, timestamp: Option<u64>) {
        if self.state() != SessionState::Active {
            tracing::debug!(tunnel_id = self.tunnel_id, "session closing; envelope dropped");
            return;
        }
        {
            let mut early = lock(&self.early);
            if let Some(queue) = early.as_mut() {
                if queue.len() >= EARLY_LIMIT {
                    queue.pop_front();
                    tracing::warn!(tunnel_id = self.tunnel_id, "early envelope queue full; oldest dropped");
                }
                queue.push_back((env, timestamp));
                return;
            }
        }
        self.sink.deliver(env, timestamp);
    }

    /// Remote side or physical channel is gone. No close request is sent.
    pub(super) fn finalize(&self) {
        if !self.advance(SessionState::Closed) {
            return;
        }
        self.sink.closed();
        self.sink.detach();
    }

    /// Local close: unregister, tell the remote, then signal the sink.
    fn close_session(&self) {
        if !self.advance(SessionState::Closing) {
            return;
        }
        if let Some(mux) = self.mux.upgrade() {
            mux.unregister(self.tunnel_id);
        }
        let sent = self
            .downlevel
            .send(Envelope::tunneled(self.tunnel_id, SessionMsg::Close));
        tracing::debug!(tunnel_id = self.tunnel_id, sent, "session closed locally");
        self.advance(SessionState::Closed);
        self.sink.closed();
        self.sink.detach();
    }
}

#[async_trait]
impl Channel<Envelope> for Session {
    /// Stamps the session's tunnel id onto the envelope.
    fn send(&self, mut msg: Envelope) -> bool {
        if self.state() != SessionState::Active {
            return false;
        }
        msg.tunnel_id = self.tunnel_id;
        self.downlevel.send(msg)
    }

    fn mode(&self) -> Mode {
        Mode::Push
    }

    fn is_open(&self) -> bool {
        self.state() == SessionState::Active && self.downlevel.is_open()
    }

    /// The first sink also receives whatever arrived before it.
    fn attach_sink(&self, sink: Weak<dyn Sink<Envelope>>) {
        let mut early = lock(&self.early);
        self.sink.attach(sink);
        for (env, timestamp) in early.take().into_iter().flatten() {
            self.sink.deliver(env, timestamp);
        }
    }

    fn detach_sink(&self) {
        self.sink.detach();
    }

    async fn receive(&self, _timeout: Duration) -> Option<(Envelope, Option<u64>)> {
        None
    }

    fn close(&self) {
        self.close_session();
    }
}
