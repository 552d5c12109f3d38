//! Tunnel-id multiplexer over one envelope channel.
//!
//! The multiplexer owns the physical-side channel and a map of logical
//! sessions; inbound envelopes are routed by `tunnel_id`. Session control
//! traffic (`closed_ind`, `heartbeat`) is handled here and never reaches the
//! session's sink.
//!
//! A tunnel granted by `open_tunnel_report` is bound while the report is
//! routed, so traffic the remote sends on it right away is held for whoever
//! claims it. Unclaimed grants are closed with the session that carried them.

mod session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use spex_core::protocol::{CommutatorMsg, Envelope, Message, SessionMsg};
use spex_core::{Result, SpexError, Status};

use crate::channel::{weak_sink, Channel, Mode, Sink};
use crate::obs::TransportMetrics;

pub use session::{Session, SessionState};

/// Call status for a session that could not be bound after the remote
/// granted a tunnel.
pub(crate) fn open_status(err: &SpexError) -> Status {
    match err {
        SpexError::NotConnected => Status::ChannelClosed,
        _ => Status::InvalidTunnel,
    }
}

pub struct SessionMux {
    this: Weak<SessionMux>,
    name: String,
    downlevel: Arc<dyn Channel<Envelope>>,
    sessions: DashMap<u32, Arc<Session>>,
    closed: AtomicBool,
    metrics: Arc<TransportMetrics>,
}

impl SessionMux {
    /// Attach to a push-mode envelope channel and start routing.
    pub fn attach(
        name: impl Into<String>,
        downlevel: Arc<dyn Channel<Envelope>>,
        metrics: Arc<TransportMetrics>,
    ) -> Result<Arc<Self>> {
        if !downlevel.is_open() {
            return Err(SpexError::NotConnected);
        }
        if downlevel.mode() != Mode::Push {
            return Err(SpexError::Internal("session mux requires a push-mode channel".into()));
        }
        let mux = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            name: name.into(),
            downlevel,
            sessions: DashMap::new(),
            closed: AtomicBool::new(false),
            metrics,
        });
        mux.downlevel.attach_sink(weak_sink(&mux));
        Ok(mux)
    }

    /// Register a session for `tunnel_id`.
    ///
    /// Fails with `DuplicateTunnel` while another active session holds the id,
    /// and with `NotConnected` once the physical channel is gone.
    pub fn create_session(self: &Arc<Self>, tunnel_id: u32) -> Result<Arc<Session>> {
        if self.closed.load(Ordering::Acquire) || !self.downlevel.is_open() {
            return Err(SpexError::NotConnected);
        }
        match self.sessions.entry(tunnel_id) {
            Entry::Occupied(_) => Err(SpexError::DuplicateTunnel(tunnel_id)),
            Entry::Vacant(slot) => {
                let session = Arc::new(Session::new(
                    tunnel_id,
                    Arc::downgrade(self),
                    Arc::clone(&self.downlevel),
                ));
                slot.insert(Arc::clone(&session));
                self.metrics.sessions_active.inc(&[("mux", self.name.as_str())]);
                tracing::debug!(mux = %self.name, tunnel_id, "session created");
                Ok(session)
            }
        }
    }

    /// Take the session for a tunnel the remote has just granted: the one
    /// bound when the grant was routed, or a fresh one.
    pub fn claim_session(self: &Arc<Self>, tunnel_id: u32) -> Result<Arc<Session>> {
        match self.session(tunnel_id) {
            Some(session) if session.claim() => Ok(session),
            Some(_) => Err(SpexError::DuplicateTunnel(tunnel_id)),
            None => self.create_session(tunnel_id),
        }
    }

    fn bind_granted(&self, tunnel_id: u32, origin: u32) {
        if !self.is_open() {
            return;
        }
        match self.sessions.entry(tunnel_id) {
            Entry::Occupied(_) => {
                tracing::warn!(mux = %self.name, tunnel_id, origin, "granted tunnel already bound");
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Session::granted(
                    tunnel_id,
                    origin,
                    self.this.clone(),
                    Arc::clone(&self.downlevel),
                )));
                self.metrics.sessions_active.inc(&[("mux", self.name.as_str())]);
                tracing::debug!(mux = %self.name, tunnel_id, origin, "granted session bound");
            }
        }
    }

    pub fn session(&self, tunnel_id: u32) -> Option<Arc<Session>> {
        self.sessions.get(&tunnel_id).map(|s| Arc::clone(s.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.downlevel.is_open()
    }

    /// Close the physical side; every session is finalized through `on_closed`.
    pub fn close(&self) {
        self.downlevel.close();
        self.on_closed();
    }

    pub(crate) fn unregister(&self, tunnel_id: u32) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&tunnel_id).map(|(_, s)| s);
        if removed.is_some() {
            self.metrics.sessions_active.dec(&[("mux", self.name.as_str())]);
            let orphans: Vec<Arc<Session>> = self
                .sessions
                .iter()
                .filter(|s| s.value().is_unclaimed_grant_of(tunnel_id))
                .map(|s| Arc::clone(s.value()))
                .collect();
            for orphan in orphans {
                tracing::debug!(mux = %self.name, tunnel_id = orphan.tunnel_id(), "closing unclaimed grant");
                orphan.close();
            }
        }
        removed
    }
}

impl Sink<Envelope> for SessionMux {
    fn on_receive(&self, env: Envelope, timestamp: Option<u64>) {
        let tunnel_id = env.tunnel_id;
        let Some(session) = self.session(tunnel_id) else {
            tracing::warn!(mux = %self.name, tunnel_id, "no session for tunnel; envelope dropped");
            self.metrics
                .envelopes_dropped
                .inc(&[("reason", "unknown_tunnel")]);
            return;
        };

        match env.choice {
            Message::Session(SessionMsg::ClosedInd) => {
                tracing::debug!(mux = %self.name, tunnel_id, "session closed by remote");
                self.unregister(tunnel_id);
                session.finalize();
            }
            Message::Session(SessionMsg::Heartbeat(value)) => {
                session.send(Envelope::new(SessionMsg::Heartbeat(value)));
            }
            choice => {
                if let Message::Commutator(CommutatorMsg::OpenTunnelReport(granted)) = &choice {
                    self.bind_granted(*granted, tunnel_id);
                }
                let timestamp = env.timestamp.or(timestamp);
                session.deliver(
                    Envelope {
                        tunnel_id,
                        timestamp,
                        choice,
                    },
                    timestamp,
                );
            }
        }
    }

    fn on_closed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let ids: Vec<u32> = self.sessions.iter().map(|s| *s.key()).collect();
        tracing::info!(mux = %self.name, sessions = ids.len(), "physical channel closed");
        for id in ids {
            if let Some(session) = self.unregister(id) {
                session.finalize();
            }
        }
    }

    fn on_mode_changed(&self, mode: Mode) {
        if mode == Mode::Pull {
            tracing::error!(mux = %self.name, "physical channel switched to pull mode; routing stalls");
        }
    }
}
