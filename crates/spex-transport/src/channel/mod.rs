//! Dispatch contract and physical channels.
//!
//! Every layer above the raw socket speaks the same two-role contract:
//! a [`Channel`] can send (and may be pollable), a [`Sink`] receives pushed
//! messages. Sinks are held weakly by the channel below them, so ownership
//! always points downward.

mod contract;
mod mailbox;
pub mod memory;
pub mod udp;

pub use contract::{weak_sink, Channel, Inbox, Mode, Sink, SinkSlot};
pub use mailbox::{Mailbox, WaitError};
pub use memory::MemoryChannel;
pub use udp::UdpChannel;

pub(crate) use contract::lock;
