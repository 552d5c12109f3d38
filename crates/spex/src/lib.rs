//! Top-level facade crate for spex.
//!
//! Re-exports the wire schema and the transport library so users can depend
//! on a single crate.

pub mod core {
    pub use spex_core::*;
}

pub mod transport {
    pub use spex_transport::*;
}

pub use spex_core::{Result, SpexError, Status};
pub use spex_transport::{Commutator, Connection, ModuleHandle, ModuleRegistry, SlotEvent, Usage};
