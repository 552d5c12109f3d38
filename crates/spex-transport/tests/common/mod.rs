//! Scripted remote device on the far end of an in-memory channel.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use spex_core::protocol::frame::{decode_frame, encode_frame};
use spex_core::protocol::{
    CommutatorMsg, CommutatorStatus, CommutatorUpdate, Envelope, Message, ModuleInfo, ModuleMsg,
    RootSessionMsg, SessionMsg,
};
use spex_transport::channel::{Channel, MemoryChannel, Mode};
use spex_transport::config::Settings;
use spex_transport::obs::TransportMetrics;
use spex_transport::Connection;

pub const ROOT_SESSION: u32 = 1;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Let in-flight deliveries run. Under a paused clock this returns as soon
/// as every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

pub fn frame(env: &Envelope) -> Bytes {
    encode_frame(env).unwrap()
}

pub fn settings() -> Settings {
    Settings {
        response_timeout: Duration::from_millis(500),
        open_tunnel_retries: 3,
        mailbox_capacity: 64,
        retire_stale_slots: false,
    }
}

#[derive(Default)]
struct DeviceState {
    total_slots: u32,
    slots: BTreeMap<u32, ModuleInfo>,
    next_id: u32,
    commutator_sessions: HashSet<u32>,
    tunnels: HashMap<u32, u32>,
    monitors: HashSet<u32>,
    open_tunnel_calls: usize,
    fail_opens: usize,
    lose_listing: usize,
    mute_modules: bool,
    closed: Vec<u32>,
    heartbeats: Vec<(u32, u64)>,
}

impl DeviceState {
    fn handle(&mut self, env: Envelope) -> Vec<Envelope> {
        let id = env.tunnel_id;
        if let Message::Session(SessionMsg::Close) = env.choice {
            self.commutator_sessions.remove(&id);
            self.monitors.remove(&id);
            self.tunnels.remove(&id);
            self.closed.push(id);
            return vec![];
        }
        if let Message::Session(SessionMsg::Heartbeat(v)) = env.choice {
            self.heartbeats.push((id, v));
            return vec![];
        }

        if id == ROOT_SESSION {
            return match env.choice {
                Message::RootSession(RootSessionMsg::NewCommutatorSession) => {
                    let session = self.alloc();
                    self.commutator_sessions.insert(session);
                    vec![Envelope::tunneled(id, RootSessionMsg::CommutatorSession(session))]
                }
                _ => vec![],
            };
        }

        if self.commutator_sessions.contains(&id) {
            let Message::Commutator(req) = env.choice else {
                return vec![];
            };
            return self
                .commutator(id, req)
                .into_iter()
                .map(|msg| Envelope::tunneled(id, msg))
                .collect();
        }

        if let Some(slot) = self.tunnels.get(&id).copied() {
            if self.mute_modules {
                return vec![];
            }
            if let Message::Module(msg) = env.choice {
                let body = json!({ "slot": slot, "echo": msg.body });
                return vec![Envelope::tunneled(id, ModuleMsg::new(msg.interface, body))];
            }
        }
        vec![]
    }

    fn commutator(&mut self, session: u32, req: CommutatorMsg) -> Vec<CommutatorMsg> {
        match req {
            CommutatorMsg::TotalSlotsReq => vec![CommutatorMsg::TotalSlots(self.total_slots)],
            CommutatorMsg::ModuleInfoReq(slot) => vec![CommutatorMsg::ModuleInfo(self.info(slot))],
            CommutatorMsg::AllModulesInfoReq => {
                let lost = std::mem::take(&mut self.lose_listing);
                (0..self.total_slots)
                    .skip(lost)
                    .map(|slot| CommutatorMsg::ModuleInfo(self.info(slot)))
                    .collect()
            }
            CommutatorMsg::OpenTunnel(slot) => {
                self.open_tunnel_calls += 1;
                if self.fail_opens > 0 {
                    self.fail_opens -= 1;
                    return vec![CommutatorMsg::OpenTunnelFailed(CommutatorStatus::ModuleOffline)];
                }
                if !self.slots.contains_key(&slot) {
                    return vec![CommutatorMsg::OpenTunnelFailed(CommutatorStatus::InvalidSlot)];
                }
                let tunnel = self.alloc();
                self.tunnels.insert(tunnel, slot);
                vec![CommutatorMsg::OpenTunnelReport(tunnel)]
            }
            CommutatorMsg::CloseTunnel(tunnel) => {
                let status = match self.tunnels.remove(&tunnel) {
                    Some(_) => CommutatorStatus::Success,
                    None => CommutatorStatus::InvalidTunnel,
                };
                vec![CommutatorMsg::CloseTunnelStatus(status)]
            }
            CommutatorMsg::Monitor => {
                self.monitors.insert(session);
                vec![CommutatorMsg::MonitorAck(CommutatorStatus::Success)]
            }
            _ => vec![],
        }
    }

    fn info(&self, slot: u32) -> ModuleInfo {
        self.slots
            .get(&slot)
            .cloned()
            .unwrap_or_else(|| ModuleInfo::new(slot, ModuleInfo::EMPTY_TYPE, ""))
    }

    fn alloc(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone)]
pub struct FakeDevice {
    end: Arc<MemoryChannel>,
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    /// Spawn the device; returns it with the client's end of the pipe.
    pub fn spawn(total_slots: u32) -> (Self, Arc<MemoryChannel>) {
        let (client, end) = MemoryChannel::pair("fake-device");
        end.set_mode(Mode::Pull);
        let state = Arc::new(Mutex::new(DeviceState {
            total_slots,
            next_id: 100,
            ..DeviceState::default()
        }));
        let device = Self { end, state };
        tokio::spawn(device.clone().serve());
        (device, client)
    }

    async fn serve(self) {
        loop {
            let Some((data, _)) = self.end.receive(Duration::from_secs(3600)).await else {
                if !self.end.is_open() {
                    break;
                }
                continue;
            };
            let Ok(env) = decode_frame(data) else {
                continue;
            };
            let replies = self.state.lock().unwrap().handle(env);
            for reply in replies {
                self.end.send(frame(&reply));
            }
        }
    }

    pub fn set_module(&self, slot: u32, module_type: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .slots
            .insert(slot, ModuleInfo::new(slot, module_type, name));
    }

    pub fn remove_module(&self, slot: u32) {
        self.state.lock().unwrap().slots.remove(&slot);
    }

    /// Change the table and push an update to every monitor.
    pub fn attach_module(&self, slot: u32, module_type: &str, name: &str) {
        self.set_module(slot, module_type, name);
        let info = ModuleInfo::new(slot, module_type, name);
        self.notify(CommutatorUpdate::ModuleAttached(info));
    }

    pub fn detach_module(&self, slot: u32) {
        self.remove_module(slot);
        self.notify(CommutatorUpdate::ModuleDetached(slot));
    }

    fn notify(&self, update: CommutatorUpdate) {
        let monitors: Vec<u32> = self.state.lock().unwrap().monitors.iter().copied().collect();
        for id in monitors {
            self.push(Envelope::tunneled(id, CommutatorMsg::Update(update.clone())));
        }
    }

    pub fn push(&self, env: Envelope) -> bool {
        self.end.send(frame(&env))
    }

    pub fn fail_next_opens(&self, n: usize) {
        self.state.lock().unwrap().fail_opens = n;
    }

    /// Drop the first `n` entries of the next module listing.
    pub fn lose_listing_entries(&self, n: usize) {
        self.state.lock().unwrap().lose_listing = n;
    }

    pub fn mute_modules(&self, mute: bool) {
        self.state.lock().unwrap().mute_modules = mute;
    }

    pub fn open_tunnel_calls(&self) -> usize {
        self.state.lock().unwrap().open_tunnel_calls
    }

    pub fn open_tunnels(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.state.lock().unwrap().tunnels.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn closed_sessions(&self) -> Vec<u32> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn monitors(&self) -> usize {
        self.state.lock().unwrap().monitors.len()
    }

    pub fn heartbeats(&self) -> Vec<(u32, u64)> {
        self.state.lock().unwrap().heartbeats.clone()
    }

    pub fn hang_up(&self) {
        self.end.close();
    }
}

/// Device plus a connection to it with test settings.
pub fn connect(total_slots: u32, settings: Settings) -> (FakeDevice, Connection) {
    init_tracing();
    let (device, client) = FakeDevice::spawn(total_slots);
    let metrics = Arc::new(TransportMetrics::default());
    let conn = Connection::over(client, ROOT_SESSION, settings, metrics).unwrap();
    (device, conn)
}
