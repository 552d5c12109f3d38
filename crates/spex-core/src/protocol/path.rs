//! Discriminator paths.
//!
//! A path such as `["commutator", "open_tunnel_report"]` names one variant per
//! nesting level. Matching checks every discriminator along the path and
//! yields `false` at the first mismatch: a different variant is "absent", not
//! an error.

use serde_json::Value;

use super::message::{CommutatorMsg, CommutatorUpdate, Message, RootSessionMsg, SessionMsg};

/// What sits below a variant.
pub enum Nested<'a> {
    OneOf(&'a dyn OneOf),
    /// Externally encoded body; remaining segments are object keys.
    Json(&'a Value),
}

/// A discriminated union: exactly one named variant is present.
pub trait OneOf {
    /// Name of the present variant.
    fn choice(&self) -> &str;
    /// Nested group of the present variant, if it has one.
    fn nested(&self) -> Option<Nested<'_>>;
}

/// True if every discriminator along `path` matches. An empty path matches
/// anything.
pub fn matches_path(msg: &dyn OneOf, path: &[&str]) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return true;
    };
    if msg.choice() != *head {
        return false;
    }
    if rest.is_empty() {
        return true;
    }
    match msg.nested() {
        Some(Nested::OneOf(inner)) => matches_path(inner, rest),
        Some(Nested::Json(body)) => json_has_path(body, rest),
        None => false,
    }
}

fn json_has_path(mut value: &Value, path: &[&str]) -> bool {
    for key in path {
        match value.get(*key) {
            Some(v) => value = v,
            None => return false,
        }
    }
    true
}

impl OneOf for Message {
    fn choice(&self) -> &str {
        match self {
            Message::Encapsulated(_) => "encapsulated",
            Message::Session(_) => "session",
            Message::RootSession(_) => "root_session",
            Message::Commutator(_) => "commutator",
            // domain interfaces are addressed by their own name
            Message::Module(m) => &m.interface,
        }
    }

    fn nested(&self) -> Option<Nested<'_>> {
        match self {
            Message::Encapsulated(env) => Some(Nested::OneOf(&env.choice)),
            Message::Session(m) => Some(Nested::OneOf(m)),
            Message::RootSession(m) => Some(Nested::OneOf(m)),
            Message::Commutator(m) => Some(Nested::OneOf(m)),
            Message::Module(m) => Some(Nested::Json(&m.body)),
        }
    }
}

impl OneOf for SessionMsg {
    fn choice(&self) -> &str {
        match self {
            SessionMsg::Close => "close",
            SessionMsg::ClosedInd => "closed_ind",
            SessionMsg::Heartbeat(_) => "heartbeat",
        }
    }

    fn nested(&self) -> Option<Nested<'_>> {
        None
    }
}

impl OneOf for RootSessionMsg {
    fn choice(&self) -> &str {
        match self {
            RootSessionMsg::NewCommutatorSession => "new_commutator_session",
            RootSessionMsg::CommutatorSession(_) => "commutator_session",
        }
    }

    fn nested(&self) -> Option<Nested<'_>> {
        None
    }
}

impl OneOf for CommutatorMsg {
    fn choice(&self) -> &str {
        match self {
            CommutatorMsg::TotalSlotsReq => "total_slots_req",
            CommutatorMsg::TotalSlots(_) => "total_slots",
            CommutatorMsg::ModuleInfoReq(_) => "module_info_req",
            CommutatorMsg::ModuleInfo(_) => "module_info",
            CommutatorMsg::AllModulesInfoReq => "all_modules_info_req",
            CommutatorMsg::OpenTunnel(_) => "open_tunnel",
            CommutatorMsg::OpenTunnelReport(_) => "open_tunnel_report",
            CommutatorMsg::OpenTunnelFailed(_) => "open_tunnel_failed",
            CommutatorMsg::CloseTunnel(_) => "close_tunnel",
            CommutatorMsg::CloseTunnelStatus(_) => "close_tunnel_status",
            CommutatorMsg::Monitor => "monitor",
            CommutatorMsg::MonitorAck(_) => "monitor_ack",
            CommutatorMsg::Update(_) => "update",
        }
    }

    fn nested(&self) -> Option<Nested<'_>> {
        match self {
            CommutatorMsg::Update(u) => Some(Nested::OneOf(u)),
            _ => None,
        }
    }
}

impl OneOf for CommutatorUpdate {
    fn choice(&self) -> &str {
        match self {
            CommutatorUpdate::ModuleAttached(_) => "module_attached",
            CommutatorUpdate::ModuleDetached(_) => "module_detached",
        }
    }

    fn nested(&self) -> Option<Nested<'_>> {
        None
    }
}
