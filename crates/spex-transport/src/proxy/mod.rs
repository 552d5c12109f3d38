//! Encode/decode adapter between two message layers.

mod codecs;

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::channel::{weak_sink, Channel, Mode, Sink, SinkSlot};

pub use codecs::{FrameCodec, TunnelCodec};

/// Pair of pure transforms. `None` means the input could not be converted
/// and is dropped by the proxy.
pub trait Codec: Send + Sync + 'static {
    type Up: Send + 'static;
    type Down: Send + 'static;

    fn encode(&self, msg: Self::Up) -> Option<Self::Down>;
    fn decode(&self, data: Self::Down) -> Option<Self::Up>;
}

/// A channel of `C::Up` layered over a channel of `C::Down`.
///
/// Owns its downlevel and registers itself there as the sink; the mode is
/// always whatever the downlevel reports.
pub struct ProxyChannel<C: Codec> {
    name: String,
    codec: C,
    downlevel: Arc<dyn Channel<C::Down>>,
    sink: SinkSlot<C::Up>,
}

impl<C: Codec> ProxyChannel<C> {
    pub fn wrap(name: impl Into<String>, codec: C, downlevel: Arc<dyn Channel<C::Down>>) -> Arc<Self> {
        let name = name.into();
        let proxy = Arc::new(Self {
            sink: SinkSlot::new(name.clone()),
            name,
            codec,
            downlevel,
        });
        proxy.downlevel.attach_sink(weak_sink(&proxy));
        proxy
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }
}

impl<C: Codec> Sink<C::Down> for ProxyChannel<C> {
    fn on_receive(&self, data: C::Down, timestamp: Option<u64>) {
        match self.codec.decode(data) {
            Some(msg) => {
                self.sink.deliver(msg, timestamp);
            }
            None => tracing::warn!(channel = %self.name, "failed to decode inbound message; dropped"),
        }
    }

    fn on_closed(&self) {
        self.sink.closed();
    }

    fn on_mode_changed(&self, mode: Mode) {
        self.sink.mode_changed(mode);
    }
}

#[async_trait]
impl<C: Codec> Channel<C::Up> for ProxyChannel<C> {
    fn send(&self, msg: C::Up) -> bool {
        match self.codec.encode(msg) {
            Some(data) => self.downlevel.send(data),
            None => {
                tracing::warn!(channel = %self.name, "failed to encode outbound message");
                false
            }
        }
    }

    fn mode(&self) -> Mode {
        self.downlevel.mode()
    }

    fn is_open(&self) -> bool {
        self.downlevel.is_open()
    }

    fn attach_sink(&self, sink: Weak<dyn Sink<C::Up>>) {
        self.sink.attach(sink);
    }

    fn detach_sink(&self) {
        self.sink.detach();
    }

    async fn receive(&self, timeout: Duration) -> Option<(C::Up, Option<u64>)> {
        if self.mode() == Mode::Push {
            return None;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let (data, timestamp) = self.downlevel.receive(left).await?;
            match self.codec.decode(data) {
                Some(msg) => return Some((msg, timestamp)),
                None => tracing::warn!(channel = %self.name, "failed to decode polled message; dropped"),
            }
        }
    }

    fn close(&self) {
        self.downlevel.close();
    }
}
