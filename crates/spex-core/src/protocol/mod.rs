//! Protocol modules (schema + frame).
//!
//! - `message`: the envelope and its closed one-of payload enums.
//! - `path`: discriminator paths used to recognise an expected response.
//! - `frame`: the binary datagram frame carrying one envelope.
//!
//! All parsers are panic-free: malformed input is reported as `SpexError`
//! instead of panicking or indexing raw buffers.

pub mod frame;
pub mod message;
pub mod path;

pub use message::{
    CommutatorMsg, CommutatorStatus, CommutatorUpdate, Envelope, Message, ModuleInfo, ModuleMsg,
    RootSessionMsg, SessionMsg,
};
pub use path::{matches_path, Nested, OneOf};
