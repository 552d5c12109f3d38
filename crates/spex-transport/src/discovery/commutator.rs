use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use spex_core::protocol::{CommutatorUpdate, ModuleInfo};
use spex_core::Status;

use super::api::CommutatorApi;
use super::module::{ModuleHandle, SlotTunnels};
use super::monitor::SlotMonitor;
use super::registry::{InterfaceKind, ModuleRegistry};
use crate::channel::lock;
use crate::config::Settings;
use crate::correlator::Correlator;
use crate::mux::{open_status, SessionMux};
use crate::obs::TransportMetrics;
use crate::pool::{SessionFactory, SessionPool, Usage};

/// Change in the slot table, in the order it must be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    Attached(ModuleInfo),
    Detached(ModuleInfo),
}

pub struct SlotEntry {
    pub info: ModuleInfo,
    /// `None` when the module type is not in the registry.
    pub module: Option<Arc<ModuleHandle>>,
}

/// Client-side mirror of one commutator's slot table.
pub struct Commutator {
    name: String,
    mux: Arc<SessionMux>,
    control: SessionPool<InterfaceKind, Correlator>,
    registry: ModuleRegistry,
    slots: Mutex<BTreeMap<u32, SlotEntry>>,
    settings: Settings,
    metrics: Arc<TransportMetrics>,
}

impl Commutator {
    pub fn new(
        name: impl Into<String>,
        mux: Arc<SessionMux>,
        control: Arc<dyn SessionFactory<InterfaceKind, Correlator>>,
        registry: ModuleRegistry,
        settings: Settings,
        metrics: Arc<TransportMetrics>,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new(Self {
            control: SessionPool::new(
                format!("{name}/control"),
                control,
                settings.open_tunnel_retries,
                Arc::clone(&metrics),
            ),
            name,
            mux,
            registry,
            slots: Mutex::new(BTreeMap::new()),
            settings,
            metrics,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn metrics(&self) -> &Arc<TransportMetrics> {
        &self.metrics
    }

    /// Cached slot table, ordered by slot id.
    pub fn modules(&self) -> Vec<ModuleInfo> {
        lock(&self.slots).values().map(|e| e.info.clone()).collect()
    }

    pub fn module(&self, slot: u32) -> Option<Arc<ModuleHandle>> {
        lock(&self.slots).get(&slot).and_then(|e| e.module.clone())
    }

    pub fn modules_of(&self, kind: InterfaceKind) -> Vec<Arc<ModuleHandle>> {
        lock(&self.slots)
            .values()
            .filter_map(|e| e.module.clone())
            .filter(|m| m.kind() == kind)
            .collect()
    }

    /// Run `f` on a pooled control session.
    pub async fn with_control<T, F, Fut>(&self, usage: Usage, unreachable: T, f: F) -> T
    where
        F: FnOnce(CommutatorApi) -> Fut,
        Fut: Future<Output = T>,
    {
        let timeout = self.settings.response_timeout;
        self.control
            .with_session(&InterfaceKind::Commutator, usage, unreachable, |s| {
                f(CommutatorApi::new(s, timeout))
            })
            .await
    }

    pub async fn total_slots(&self) -> Result<u32, Status> {
        self.with_control(Usage::Reusable, Err(Status::Unreachable), |api| async move {
            api.total_slots().await
        })
        .await
    }

    pub async fn module_info(&self, slot: u32) -> Result<ModuleInfo, Status> {
        self.with_control(Usage::Reusable, Err(Status::Unreachable), |api| async move {
            api.module_info(slot).await
        })
        .await
    }

    pub async fn close_tunnel(&self, tunnel_id: u32) -> Result<(), Status> {
        self.with_control(Usage::Reusable, Err(Status::Unreachable), |api| async move {
            api.close_tunnel(tunnel_id).await
        })
        .await
    }

    /// Fetch the full module list and reconcile the cache against it.
    pub async fn refresh(self: &Arc<Self>) -> Result<Vec<SlotEvent>, Status> {
        let listed = self
            .with_control(Usage::Reusable, Err(Status::Unreachable), |api| async move {
                api.all_modules().await
            })
            .await?;
        Ok(self.reconcile(listed))
    }

    /// Subscribe to slot updates on a dedicated control session.
    pub async fn monitor(self: &Arc<Self>) -> Result<SlotMonitor, Status> {
        let lease = self.control.acquire(&InterfaceKind::Commutator).await?;
        let api = CommutatorApi::new(lease.session().clone(), self.settings.response_timeout);
        match api.monitor().await {
            Ok(()) => {
                lease.release(Usage::Exclusive);
                tracing::info!(commutator = %self.name, "monitoring slot updates");
                Ok(SlotMonitor::new(Arc::clone(self), api))
            }
            // subscription state unknown; the lease drop discards the session
            Err(status) if status.is_local() => Err(status),
            Err(status) => {
                lease.release(Usage::Reusable);
                Err(status)
            }
        }
    }

    /// Nested commutator reached through the module in `slot` (ships).
    pub fn nested(self: &Arc<Self>, slot: u32, registry: ModuleRegistry) -> Option<Arc<Commutator>> {
        let module = self.module(slot)?;
        if module.kind() != InterfaceKind::Ship {
            return None;
        }
        let control = Arc::new(SlotTunnels::new(self, slot));
        Some(Commutator::new(
            format!("{}/{}", self.name, module.name()),
            Arc::clone(&self.mux),
            control,
            registry,
            self.settings.clone(),
            Arc::clone(&self.metrics),
        ))
    }

    /// Open a tunnel to `slot` and bind a session to it.
    pub(crate) async fn open_tunnel_session(&self, slot: u32) -> Result<Correlator, Status> {
        let tunnel_id = self
            .with_control(Usage::Reusable, Err(Status::Unreachable), |api| async move {
                api.open_tunnel(slot).await
            })
            .await?;
        let session = self.mux.claim_session(tunnel_id).map_err(|e| {
            tracing::warn!(commutator = %self.name, slot, tunnel_id, code = e.code().as_str(), "tunnel not bound");
            open_status(&e)
        })?;
        tracing::info!(commutator = %self.name, slot, tunnel_id, "tunnel opened");
        Ok(Correlator::attach(
            format!("{}/slot{}#{}", self.name, slot, tunnel_id),
            session,
            self.settings.mailbox_capacity,
            Arc::clone(&self.metrics),
        ))
    }

    /// Apply one monitor update to the cache.
    pub(crate) fn apply_update(self: &Arc<Self>, update: CommutatorUpdate) -> Vec<SlotEvent> {
        let mut slots = lock(&self.slots);
        let mut events = Vec::new();
        match update {
            CommutatorUpdate::ModuleAttached(info) if info.is_empty_slot() => {
                self.detach_slot(&mut slots, info.slot_id, &mut events);
            }
            CommutatorUpdate::ModuleAttached(info) => self.attach_slot(&mut slots, info, &mut events),
            CommutatorUpdate::ModuleDetached(slot) => self.detach_slot(&mut slots, slot, &mut events),
        }
        events
    }

    fn reconcile(self: &Arc<Self>, listed: Vec<ModuleInfo>) -> Vec<SlotEvent> {
        let mut slots = lock(&self.slots);
        let mut events = Vec::new();
        let mut seen = BTreeSet::new();
        for info in listed {
            seen.insert(info.slot_id);
            self.attach_slot(&mut slots, info, &mut events);
        }
        if self.settings.retire_stale_slots {
            let stale: Vec<u32> = slots.keys().filter(|id| !seen.contains(id)).copied().collect();
            for slot in stale {
                self.detach_slot(&mut slots, slot, &mut events);
            }
        }
        events
    }

    fn attach_slot(
        self: &Arc<Self>,
        slots: &mut BTreeMap<u32, SlotEntry>,
        info: ModuleInfo,
        events: &mut Vec<SlotEvent>,
    ) {
        if let Some(entry) = slots.get(&info.slot_id) {
            if entry.info == info {
                return;
            }
            self.detach_slot(slots, info.slot_id, events);
        }

        let module = match self.registry.resolve(&info.module_type) {
            Some(kind) => Some(ModuleHandle::new(self, info.clone(), kind)),
            None => {
                tracing::info!(
                    commutator = %self.name,
                    slot = info.slot_id,
                    module_type = %info.module_type,
                    "unknown module type; no handle"
                );
                None
            }
        };
        self.metrics.slot_events.inc(&[("event", "attached")]);
        slots.insert(
            info.slot_id,
            SlotEntry {
                info: info.clone(),
                module,
            },
        );
        events.push(SlotEvent::Attached(info));
    }

    fn detach_slot(&self, slots: &mut BTreeMap<u32, SlotEntry>, slot: u32, events: &mut Vec<SlotEvent>) {
        let Some(entry) = slots.remove(&slot) else {
            return;
        };
        if let Some(module) = &entry.module {
            module.close_idle();
        }
        self.metrics.slot_events.inc(&[("event", "detached")]);
        events.push(SlotEvent::Detached(entry.info));
    }

    /// Close idle control and module sessions.
    pub fn shutdown(&self) {
        self.control.close_idle();
        for entry in lock(&self.slots).values() {
            if let Some(module) = &entry.module {
                module.close_idle();
            }
        }
    }
}
