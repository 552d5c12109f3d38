//! In-process byte channel pair, used to stand in for the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::contract::{lock, Channel, Inbox, Mode, Sink};

const PULL_QUEUE_CAPACITY: usize = 1024;

pub struct MemoryChannel {
    name: String,
    inbox: Arc<Inbox<Bytes>>,
    peer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    open: AtomicBool,
}

impl MemoryChannel {
    /// Two connected push-mode ends. Must be called inside a runtime.
    pub fn pair(name: &str) -> (Arc<Self>, Arc<Self>) {
        let (to_a, from_b) = mpsc::unbounded_channel();
        let (to_b, from_a) = mpsc::unbounded_channel();
        let a = Self::end(format!("{name}/a"), to_b, from_b);
        let b = Self::end(format!("{name}/b"), to_a, from_a);
        (a, b)
    }

    fn end(
        name: String,
        peer: mpsc::UnboundedSender<Bytes>,
        mut rx: mpsc::UnboundedReceiver<Bytes>,
    ) -> Arc<Self> {
        let inbox = Arc::new(Inbox::new(name.clone(), Mode::Push, PULL_QUEUE_CAPACITY));
        let pump = Arc::clone(&inbox);
        tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                pump.deliver(data, None);
            }
            // peer hung up
            pump.close();
        });
        Arc::new(Self {
            name,
            inbox,
            peer: Mutex::new(Some(peer)),
            open: AtomicBool::new(true),
        })
    }

    pub fn set_mode(&self, mode: Mode) {
        self.inbox.set_mode(mode);
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Channel<Bytes> for MemoryChannel {
    fn send(&self, msg: Bytes) -> bool {
        if !self.is_open() {
            return false;
        }
        match lock(&self.peer).as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    fn mode(&self) -> Mode {
        self.inbox.mode()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.inbox.is_closed()
    }

    fn attach_sink(&self, sink: Weak<dyn Sink<Bytes>>) {
        self.inbox.attach(sink);
    }

    fn detach_sink(&self) {
        self.inbox.detach();
    }

    async fn receive(&self, timeout: Duration) -> Option<(Bytes, Option<u64>)> {
        self.inbox.receive(timeout).await
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(channel = %self.name, "memory channel closed");
        lock(&self.peer).take();
        self.inbox.close();
    }
}
