//! Wire schema: envelope and one-of payloads.
//!
//! Every payload enum is closed: exactly one variant is present at a time.
//! Field and variant names follow the remote schema (`snake_case`), so the
//! serde encoding doubles as the discriminator names used by `path`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unit exchanged over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// 0 means "not tunneled" (top-level).
    #[serde(default)]
    pub tunnel_id: u32,
    /// Producer's clock, if it stamped the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    pub choice: Message,
}

impl Envelope {
    pub fn new(choice: impl Into<Message>) -> Self {
        Self {
            tunnel_id: 0,
            timestamp: None,
            choice: choice.into(),
        }
    }

    pub fn tunneled(tunnel_id: u32, choice: impl Into<Message>) -> Self {
        Self {
            tunnel_id,
            timestamp: None,
            choice: choice.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Shortcut for `path::matches_path(&self.choice, path)`.
    pub fn matches(&self, path: &[&str]) -> bool {
        super::path::matches_path(&self.choice, path)
    }
}

/// Top-level one-of group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    /// A full envelope nested by a tunnel-wrapping stage.
    Encapsulated(Box<Envelope>),
    Session(SessionMsg),
    RootSession(RootSessionMsg),
    Commutator(CommutatorMsg),
    /// Domain-interface traffic (engine, shipyard, ...). The body is produced
    /// by the interface's own schema codec and is opaque to the transport.
    Module(ModuleMsg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMsg {
    Close,
    ClosedInd,
    Heartbeat(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootSessionMsg {
    NewCommutatorSession,
    CommutatorSession(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommutatorMsg {
    TotalSlotsReq,
    TotalSlots(u32),
    ModuleInfoReq(u32),
    ModuleInfo(ModuleInfo),
    AllModulesInfoReq,
    OpenTunnel(u32),
    OpenTunnelReport(u32),
    OpenTunnelFailed(CommutatorStatus),
    CloseTunnel(u32),
    CloseTunnelStatus(CommutatorStatus),
    Monitor,
    MonitorAck(CommutatorStatus),
    Update(CommutatorUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommutatorUpdate {
    ModuleAttached(ModuleInfo),
    ModuleDetached(u32),
}

/// Remote-reported status codes of the commutator interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommutatorStatus {
    Success,
    InvalidSlot,
    ModuleOffline,
    RejectedByModule,
    InvalidTunnel,
    CommutatorOffline,
    TooManySessions,
}

/// Description of a module plugged into a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleInfo {
    pub slot_id: u32,
    pub module_type: String,
    #[serde(default)]
    pub module_name: String,
}

impl ModuleInfo {
    /// Type reported by the remote for an unoccupied slot.
    pub const EMPTY_TYPE: &'static str = "empty";

    pub fn new(slot_id: u32, module_type: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            slot_id,
            module_type: module_type.into(),
            module_name: module_name.into(),
        }
    }

    pub fn is_empty_slot(&self) -> bool {
        self.module_type == Self::EMPTY_TYPE
    }
}

/// Payload of a domain interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleMsg {
    /// Interface name, e.g. "engine".
    pub interface: String,
    #[serde(default)]
    pub body: Value,
}

impl ModuleMsg {
    pub fn new(interface: impl Into<String>, body: Value) -> Self {
        Self {
            interface: interface.into(),
            body,
        }
    }
}

impl From<SessionMsg> for Message {
    fn from(m: SessionMsg) -> Self {
        Message::Session(m)
    }
}

impl From<RootSessionMsg> for Message {
    fn from(m: RootSessionMsg) -> Self {
        Message::RootSession(m)
    }
}

impl From<CommutatorMsg> for Message {
    fn from(m: CommutatorMsg) -> Self {
        Message::Commutator(m)
    }
}

impl From<ModuleMsg> for Message {
    fn from(m: ModuleMsg) -> Self {
        Message::Module(m)
    }
}

impl From<Envelope> for Message {
    fn from(env: Envelope) -> Self {
        Message::Encapsulated(Box::new(env))
    }
}
