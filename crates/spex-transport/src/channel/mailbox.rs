use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use spex_core::Status;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::contract::{lock, Sink};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for a message")]
    Timeout,
    #[error("channel closed")]
    Closed,
}

impl From<WaitError> for Status {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Timeout => Status::ResponseTimeout,
            WaitError::Closed => Status::ChannelClosed,
        }
    }
}

/// Bounded FIFO with a single waiter.
///
/// On overflow the oldest message is dropped. After `close()` queued
/// messages are still handed out; once empty, waiters get `Closed`.
pub struct Mailbox<M> {
    name: String,
    capacity: usize,
    queue: Mutex<VecDeque<(M, Option<u64>)>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<M> Mailbox<M> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, msg: M, timestamp: Option<u64>) {
        if self.is_closed() {
            return;
        }
        {
            let mut q = lock(&self.queue);
            if q.len() >= self.capacity {
                q.pop_front();
                tracing::warn!(mailbox = %self.name, capacity = self.capacity, "mailbox full; oldest message dropped");
            }
            q.push_back((msg, timestamp));
        }
        self.notify.notify_one();
    }

    pub async fn pop(&self, timeout: Duration) -> Result<(M, Option<u64>), WaitError> {
        self.pop_until(Instant::now() + timeout).await
    }

    pub async fn pop_until(&self, deadline: Instant) -> Result<(M, Option<u64>), WaitError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = lock(&self.queue).pop_front() {
                return Ok(item);
            }
            if self.is_closed() {
                return Err(WaitError::Closed);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return lock(&self.queue).pop_front().ok_or(WaitError::Timeout);
            }
        }
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        lock(&self.queue).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: Send> Sink<M> for Mailbox<M> {
    fn on_receive(&self, msg: M, timestamp: Option<u64>) {
        self.push(msg, timestamp);
    }

    fn on_closed(&self) {
        self.close();
    }
}
