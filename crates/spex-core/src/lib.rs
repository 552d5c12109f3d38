//! spex core: transport-agnostic wire schema, frame codec, status codes and errors.
//!
//! This crate defines the envelope and its one-of payloads, the discriminator
//! paths used to match responses, and the binary frame that carries an
//! envelope over a datagram. It carries no runtime or socket dependencies so the
//! schema can be shared by the transport, tooling and test doubles.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Malformed datagrams surface as `SpexError`/`Result`, never as a crash.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;
pub mod status;

/// Shared result type.
pub use error::{ErrorCode, Result, SpexError};
pub use status::Status;
