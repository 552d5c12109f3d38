//! Caller-visible outcome of a remote call.
//!
//! Remote-reported codes come straight off the wire; the remaining codes are
//! synthesized by the transport when a call fails locally.

use crate::protocol::message::CommutatorStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    InvalidSlot,
    ModuleOffline,
    RejectedByModule,
    InvalidTunnel,
    CommutatorOffline,
    TooManySessions,

    // transport-local
    FailedToSendRequest,
    ResponseTimeout,
    UnexpectedResponse,
    ChannelClosed,
    Canceled,
    /// No session could be acquired within the configured retries.
    Unreachable,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Success
    }

    /// True for codes produced locally rather than reported by the remote.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            Status::FailedToSendRequest
                | Status::ResponseTimeout
                | Status::UnexpectedResponse
                | Status::ChannelClosed
                | Status::Canceled
                | Status::Unreachable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::InvalidSlot => "INVALID_SLOT",
            Status::ModuleOffline => "MODULE_OFFLINE",
            Status::RejectedByModule => "REJECTED_BY_MODULE",
            Status::InvalidTunnel => "INVALID_TUNNEL",
            Status::CommutatorOffline => "COMMUTATOR_OFFLINE",
            Status::TooManySessions => "TOO_MANY_SESSIONS",
            Status::FailedToSendRequest => "FAILED_TO_SEND_REQUEST",
            Status::ResponseTimeout => "RESPONSE_TIMEOUT",
            Status::UnexpectedResponse => "UNEXPECTED_RESPONSE",
            Status::ChannelClosed => "CHANNEL_CLOSED",
            Status::Canceled => "CANCELED",
            Status::Unreachable => "UNREACHABLE",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CommutatorStatus> for Status {
    fn from(s: CommutatorStatus) -> Self {
        match s {
            CommutatorStatus::Success => Status::Success,
            CommutatorStatus::InvalidSlot => Status::InvalidSlot,
            CommutatorStatus::ModuleOffline => Status::ModuleOffline,
            CommutatorStatus::RejectedByModule => Status::RejectedByModule,
            CommutatorStatus::InvalidTunnel => Status::InvalidTunnel,
            CommutatorStatus::CommutatorOffline => Status::CommutatorOffline,
            CommutatorStatus::TooManySessions => Status::TooManySessions,
        }
    }
}
