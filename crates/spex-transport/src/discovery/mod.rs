//! Device/slot discovery.
//!
//! A [`Commutator`] mirrors the remote's slot table, turns differences into
//! ordered attach/detach events and hands out a [`ModuleHandle`] per
//! recognized module.

mod api;
mod commutator;
mod module;
mod monitor;
mod registry;

pub use api::CommutatorApi;
pub use commutator::{Commutator, SlotEntry, SlotEvent};
pub use module::ModuleHandle;
pub use monitor::SlotMonitor;
pub use registry::{InterfaceKind, ModuleRegistry};
