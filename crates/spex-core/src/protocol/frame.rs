//! Datagram frame carrying one envelope (panic-free).
//!
//! Layout (little endian):
//! - `version: u8` (always 1)
//! - `flags: u8` (bit 0: timestamp present)
//! - `tunnel_id: u32`
//! - `timestamp: u64` if flagged
//! - payload: the serde-encoded `Message`
//!
//! Parsing rules:
//! - Read through `Buf` after a `remaining()` check; no slice indexing.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, SpexError};
use crate::protocol::message::{Envelope, Message};

pub const FRAME_VERSION: u8 = 1;

/// Flag: timestamp (u64) is present.
pub const FLAG_TIMESTAMP_PRESENT: u8 = 0x01;

/// version + flags + tunnel_id
pub const MIN_HEADER_LEN: usize = 6;

/// Encode an envelope into a datagram.
pub fn encode_frame(env: &Envelope) -> Result<Bytes> {
    let payload = serde_json::to_vec(&env.choice)
        .map_err(|e| SpexError::Internal(format!("payload encode failed: {e}")))?;

    let mut buf = BytesMut::with_capacity(MIN_HEADER_LEN + 8 + payload.len());
    buf.put_u8(FRAME_VERSION);
    let flags = if env.timestamp.is_some() {
        FLAG_TIMESTAMP_PRESENT
    } else {
        0
    };
    buf.put_u8(flags);
    buf.put_u32_le(env.tunnel_id);
    if let Some(ts) = env.timestamp {
        buf.put_u64_le(ts);
    }
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode a datagram into an envelope.
pub fn decode_frame(mut buf: Bytes) -> Result<Envelope> {
    if buf.remaining() < MIN_HEADER_LEN {
        return Err(SpexError::BadFrame("frame too short".into()));
    }

    let version = buf.get_u8();
    if version != FRAME_VERSION {
        return Err(SpexError::UnsupportedVersion(version));
    }

    let flags = buf.get_u8();
    let tunnel_id = buf.get_u32_le();

    let timestamp = if (flags & FLAG_TIMESTAMP_PRESENT) != 0 {
        if buf.remaining() < 8 {
            return Err(SpexError::BadFrame(
                "timestamp flag set but missing u64".into(),
            ));
        }
        Some(buf.get_u64_le())
    } else {
        None
    };

    if !buf.has_remaining() {
        return Err(SpexError::BadFrame("empty payload".into()));
    }

    let choice: Message = serde_json::from_slice(buf.chunk())
        .map_err(|e| SpexError::BadFrame(format!("invalid payload: {e}")))?;

    tracing::trace!(tunnel_id, ?timestamp, "frame decoded");

    Ok(Envelope {
        tunnel_id,
        timestamp,
        choice,
    })
}
