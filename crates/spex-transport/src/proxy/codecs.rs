use bytes::Bytes;
use spex_core::protocol::frame::{decode_frame, encode_frame};
use spex_core::protocol::{Envelope, Message};

use super::Codec;

/// Raw datagrams to protocol envelopes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Codec for FrameCodec {
    type Up = Envelope;
    type Down = Bytes;

    fn encode(&self, msg: Envelope) -> Option<Bytes> {
        encode_frame(&msg)
            .map_err(|e| tracing::warn!(code = e.code().as_str(), error = %e, "frame encode failed"))
            .ok()
    }

    fn decode(&self, data: Bytes) -> Option<Envelope> {
        decode_frame(data)
            .map_err(|e| tracing::warn!(code = e.code().as_str(), error = %e, "frame decode failed"))
            .ok()
    }
}

/// Wraps envelopes into an outer envelope addressed to one tunnel.
#[derive(Debug, Clone, Copy)]
pub struct TunnelCodec {
    tunnel_id: u32,
}

impl TunnelCodec {
    pub fn new(tunnel_id: u32) -> Self {
        Self { tunnel_id }
    }

    pub fn tunnel_id(&self) -> u32 {
        self.tunnel_id
    }
}

impl Codec for TunnelCodec {
    type Up = Envelope;
    type Down = Envelope;

    fn encode(&self, msg: Envelope) -> Option<Envelope> {
        Some(Envelope::tunneled(self.tunnel_id, msg))
    }

    fn decode(&self, outer: Envelope) -> Option<Envelope> {
        if outer.tunnel_id != self.tunnel_id {
            tracing::warn!(expected = self.tunnel_id, got = outer.tunnel_id, "envelope for another tunnel");
            return None;
        }
        match outer.choice {
            Message::Encapsulated(inner) => Some(*inner),
            _ => None,
        }
    }
}
