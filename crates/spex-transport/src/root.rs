//! Root session and the control-session factory built on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spex_core::protocol::{Message, RootSessionMsg};
use spex_core::Status;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::correlator::Correlator;
use crate::discovery::InterfaceKind;
use crate::mux::{open_status, SessionMux};
use crate::obs::TransportMetrics;
use crate::pool::SessionFactory;

/// The session obtained at login. It cannot be pooled, so requests on it
/// are serialized.
pub struct RootSession {
    session: Correlator,
    gate: Mutex<()>,
    timeout: Duration,
}

impl RootSession {
    pub fn new(session: Correlator, timeout: Duration) -> Self {
        Self {
            session,
            gate: Mutex::new(()),
            timeout,
        }
    }

    /// Ask the remote for a fresh commutator control session id.
    pub async fn open_commutator_session(&self) -> Result<u32, Status> {
        let _gate = self.gate.lock().await;
        self.session
            .request(RootSessionMsg::NewCommutatorSession, self.timeout, |env| {
                match env.choice {
                    Message::RootSession(RootSessionMsg::CommutatorSession(id)) => Some(id),
                    _ => None,
                }
            })
            .await
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    pub fn close(&self) {
        self.session.close();
    }
}

/// Opens control sessions to the root commutator.
pub struct RootControl {
    root: Arc<RootSession>,
    mux: Arc<SessionMux>,
    settings: Settings,
    metrics: Arc<TransportMetrics>,
}

impl RootControl {
    pub fn new(
        root: Arc<RootSession>,
        mux: Arc<SessionMux>,
        settings: Settings,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            root,
            mux,
            settings,
            metrics,
        }
    }
}

#[async_trait]
impl SessionFactory<InterfaceKind, Correlator> for RootControl {
    async fn open(&self, _kind: &InterfaceKind) -> Result<Correlator, Status> {
        let id = self.root.open_commutator_session().await?;
        let session = self.mux.create_session(id).map_err(|e| {
            tracing::warn!(session_id = id, code = e.code().as_str(), "commutator session not bound");
            open_status(&e)
        })?;
        Ok(Correlator::attach(
            format!("commutator#{id}"),
            session,
            self.settings.mailbox_capacity,
            Arc::clone(&self.metrics),
        ))
    }
}
