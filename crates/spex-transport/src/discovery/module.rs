use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use spex_core::protocol::{Envelope, ModuleInfo, ModuleMsg};
use spex_core::Status;

use super::commutator::Commutator;
use super::registry::InterfaceKind;
use crate::correlator::Correlator;
use crate::pool::{SessionFactory, SessionPool, Usage};

/// Opens tunnels to one slot of a commutator.
pub(crate) struct SlotTunnels {
    commutator: Weak<Commutator>,
    slot: u32,
}

impl SlotTunnels {
    pub(crate) fn new(commutator: &Arc<Commutator>, slot: u32) -> Self {
        Self {
            commutator: Arc::downgrade(commutator),
            slot,
        }
    }
}

#[async_trait]
impl SessionFactory<InterfaceKind, Correlator> for SlotTunnels {
    async fn open(&self, _kind: &InterfaceKind) -> Result<Correlator, Status> {
        let commutator = self.commutator.upgrade().ok_or(Status::ChannelClosed)?;
        commutator.open_tunnel_session(self.slot).await
    }
}

/// Handle to a module plugged into a slot.
///
/// Sessions are opened lazily on first use and pooled per handle.
pub struct ModuleHandle {
    info: ModuleInfo,
    kind: InterfaceKind,
    pool: SessionPool<InterfaceKind, Correlator>,
    timeout: std::time::Duration,
}

impl ModuleHandle {
    pub(crate) fn new(commutator: &Arc<Commutator>, info: ModuleInfo, kind: InterfaceKind) -> Arc<Self> {
        let settings = commutator.settings();
        let pool = SessionPool::new(
            format!("{}/{}", commutator.name(), info.module_name),
            Arc::new(SlotTunnels::new(commutator, info.slot_id)),
            settings.open_tunnel_retries,
            Arc::clone(commutator.metrics()),
        );
        Arc::new(Self {
            timeout: settings.response_timeout,
            info,
            kind,
            pool,
        })
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn slot_id(&self) -> u32 {
        self.info.slot_id
    }

    pub fn module_type(&self) -> &str {
        &self.info.module_type
    }

    pub fn name(&self) -> &str {
        &self.info.module_name
    }

    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    pub async fn with_session<T, F, Fut>(&self, usage: Usage, unreachable: T, f: F) -> T
    where
        F: FnOnce(Correlator) -> Fut,
        Fut: Future<Output = T>,
    {
        self.pool.with_session(&self.kind, usage, unreachable, f).await
    }

    /// One request on a pooled session of this module.
    pub async fn request<T, F>(&self, body: Value, select: F) -> Result<T, Status>
    where
        F: FnOnce(Envelope) -> Option<T>,
    {
        let msg = ModuleMsg::new(self.kind.interface_name(), body);
        let timeout = self.timeout;
        self.with_session(Usage::Reusable, Err(Status::Unreachable), |s| async move {
            s.request(msg, timeout, select).await
        })
        .await
    }

    pub fn idle_sessions(&self) -> usize {
        self.pool.idle_count(&self.kind)
    }

    /// Close pooled sessions; the next call opens a fresh tunnel.
    pub fn close_idle(&self) {
        self.pool.close_idle();
    }
}
