//! Client-side transport for the remote-control protocol.
//!
//! Layers, bottom-up: physical [`channel`]s, the [`proxy`] codec stage, the
//! session [`mux`], request [`correlator`], session [`pool`] and slot
//! [`discovery`].

pub mod channel;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod discovery;
pub mod mux;
pub mod obs;
pub mod pool;
pub mod proxy;
pub mod root;

pub use connection::Connection;
pub use correlator::Correlator;
pub use discovery::{Commutator, ModuleHandle, ModuleRegistry, SlotEvent};
pub use pool::{SessionPool, Usage};
