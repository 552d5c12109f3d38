use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;

use super::mailbox::Mailbox;

/// How a channel hands inbound messages upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every inbound message is forwarded immediately to the attached sink.
    Push,
    /// Inbound messages are queued until `receive()` is called.
    Pull,
}

/// Receiving side of the contract.
pub trait Sink<M>: Send + Sync {
    fn on_receive(&self, msg: M, timestamp: Option<u64>);

    /// The channel below is gone; nothing more will be delivered.
    fn on_closed(&self) {}

    fn on_mode_changed(&self, _mode: Mode) {}
}

/// Sending side of the contract.
#[async_trait]
pub trait Channel<M: Send + 'static>: Send + Sync {
    /// Best-effort send. `false` if nothing is attached below or the
    /// message could not be handed over.
    fn send(&self, msg: M) -> bool;

    /// Mode of the lowest layer; upper layers report what they sit on.
    fn mode(&self) -> Mode;

    fn is_open(&self) -> bool;

    fn attach_sink(&self, sink: Weak<dyn Sink<M>>);

    fn detach_sink(&self);

    /// Pull-mode receive. Returns `None` immediately in push mode, or when
    /// `timeout` elapses.
    async fn receive(&self, timeout: Duration) -> Option<(M, Option<u64>)>;

    fn close(&self);
}

/// Coerce a strong reference into the weak sink handle channels store.
pub fn weak_sink<M, S>(sink: &Arc<S>) -> Weak<dyn Sink<M>>
where
    S: Sink<M> + 'static,
{
    let weak: Weak<S> = Arc::downgrade(sink);
    weak
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Attachment point for an upper-level sink.
///
/// Delivering with nothing attached is not an error: the message is dropped
/// and a warning is logged.
pub struct SinkSlot<M> {
    name: String,
    sink: Mutex<Option<Weak<dyn Sink<M>>>>,
}

impl<M> SinkSlot<M> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sink: Mutex::new(None),
        }
    }

    pub fn attach(&self, sink: Weak<dyn Sink<M>>) {
        *lock(&self.sink) = Some(sink);
    }

    pub fn detach(&self) {
        lock(&self.sink).take();
    }

    /// Upgrade outside of the lock so a sink may call back into us.
    pub fn get(&self) -> Option<Arc<dyn Sink<M>>> {
        let weak = lock(&self.sink).clone()?;
        weak.upgrade()
    }

    pub fn deliver(&self, msg: M, timestamp: Option<u64>) -> bool {
        match self.get() {
            Some(sink) => {
                sink.on_receive(msg, timestamp);
                true
            }
            None => {
                tracing::warn!(channel = %self.name, "no sink attached; message dropped");
                false
            }
        }
    }

    pub fn closed(&self) {
        if let Some(sink) = self.get() {
            sink.on_closed();
        }
    }

    pub fn mode_changed(&self, mode: Mode) {
        if let Some(sink) = self.get() {
            sink.on_mode_changed(mode);
        }
    }
}

/// Inbound side shared by the physical channels: pushes to the sink in
/// push mode, queues for `receive()` in pull mode.
pub struct Inbox<M> {
    mode: AtomicU8,
    sink: SinkSlot<M>,
    queue: Mailbox<M>,
    closed: AtomicBool,
}

const MODE_PUSH: u8 = 0;
const MODE_PULL: u8 = 1;

impl<M: Send> Inbox<M> {
    pub fn new(name: impl Into<String>, mode: Mode, capacity: usize) -> Self {
        let name = name.into();
        Self {
            mode: AtomicU8::new(encode_mode(mode)),
            queue: Mailbox::new(name.clone(), capacity),
            sink: SinkSlot::new(name),
            closed: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> Mode {
        match self.mode.load(Ordering::Acquire) {
            MODE_PULL => Mode::Pull,
            _ => Mode::Push,
        }
    }

    /// Switch mode and let the layers above know.
    pub fn set_mode(&self, mode: Mode) {
        let prev = self.mode.swap(encode_mode(mode), Ordering::AcqRel);
        if prev == encode_mode(mode) {
            return;
        }
        if mode == Mode::Push {
            // queued messages are not replayed into the sink
            self.queue.clear();
        }
        self.sink.mode_changed(mode);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn attach(&self, sink: Weak<dyn Sink<M>>) {
        self.sink.attach(sink);
    }

    pub fn detach(&self) {
        self.sink.detach();
    }

    pub fn deliver(&self, msg: M, timestamp: Option<u64>) {
        if self.is_closed() {
            return;
        }
        match self.mode() {
            Mode::Push => {
                self.sink.deliver(msg, timestamp);
            }
            Mode::Pull => {
                self.queue.push(msg, timestamp);
            }
        }
    }

    pub async fn receive(&self, timeout: Duration) -> Option<(M, Option<u64>)> {
        if self.mode() == Mode::Push {
            return None;
        }
        self.queue.pop(timeout).await.ok()
    }

    /// Fire the closed signal once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.close();
        self.sink.closed();
    }
}

fn encode_mode(mode: Mode) -> u8 {
    match mode {
        Mode::Push => MODE_PUSH,
        Mode::Pull => MODE_PULL,
    }
}
