//! Request/response correlation over a session.
//!
//! The remote protocol carries no request ids: a response is simply the next
//! message on the session. Callers therefore keep at most one request in
//! flight per session and rely on the pool for concurrency.
//!
//! A wait that times out, or a reply that does not fit the request, leaves
//! the session out of step: a late reply may still arrive and would be taken
//! as the answer to the next request. Such a session is marked stale and the
//! pool closes it instead of reusing it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spex_core::protocol::{Envelope, Message};
use spex_core::Status;
use tokio::time::Instant;

use crate::channel::{weak_sink, Channel, Mailbox, Mode, WaitError};
use crate::obs::TransportMetrics;

struct Inner {
    name: String,
    channel: Arc<dyn Channel<Envelope>>,
    mailbox: Arc<Mailbox<Envelope>>,
    waiting: AtomicBool,
    stale: AtomicBool,
    metrics: Arc<TransportMetrics>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.channel.is_open() {
            tracing::debug!(session = %self.name, "last handle dropped; closing session");
            self.channel.close();
        }
    }
}

/// Cheap-to-clone handle; the session is closed when the last clone drops.
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<Inner>,
}

struct WaitGuard<'a>(&'a AtomicBool);

impl<'a> WaitGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Self {
        let busy = flag.swap(true, Ordering::AcqRel);
        assert!(!busy, "concurrent waits on one session are not supported");
        Self(flag)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Correlator {
    /// Attach a bounded mailbox as the channel's sink.
    pub fn attach(
        name: impl Into<String>,
        channel: Arc<dyn Channel<Envelope>>,
        mailbox_capacity: usize,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        let name = name.into();
        let mailbox = Arc::new(Mailbox::new(name.clone(), mailbox_capacity));
        channel.attach_sink(weak_sink(&mailbox));
        if !channel.is_open() {
            mailbox.close();
        }
        Self {
            inner: Arc::new(Inner {
                name,
                channel,
                mailbox,
                waiting: AtomicBool::new(false),
                stale: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn send(&self, msg: impl Into<Message>) -> bool {
        self.inner.channel.send(Envelope::new(msg))
    }

    pub fn is_open(&self) -> bool {
        self.inner.channel.is_open()
    }

    /// True once a reply may be outstanding on this session.
    pub fn is_stale(&self) -> bool {
        self.inner.stale.load(Ordering::Acquire)
    }

    fn mark_stale(&self) {
        if !self.inner.stale.swap(true, Ordering::AcqRel) {
            tracing::debug!(session = %self.inner.name, "session out of step with its replies");
        }
    }

    pub fn close(&self) {
        self.inner.channel.close();
        self.inner.mailbox.close();
    }

    /// Next inbound message, with the best known timestamp filled in.
    pub async fn wait_message(&self, timeout: Duration) -> Result<Envelope, WaitError> {
        let _guard = WaitGuard::acquire(&self.inner.waiting);
        let next = self.next_until(Instant::now() + timeout).await;
        if matches!(next, Err(WaitError::Timeout)) {
            self.mark_stale();
        }
        next
    }

    /// Skip messages until one matches `path`; the timeout covers the whole wait.
    pub async fn wait_matching(&self, path: &[&str], timeout: Duration) -> Result<Envelope, WaitError> {
        self.wait_for(timeout, |env| env.matches(path).then_some(env))
            .await
    }

    /// Skip messages until `select` accepts one.
    pub async fn wait_for<T, F>(&self, timeout: Duration, mut select: F) -> Result<T, WaitError>
    where
        F: FnMut(Envelope) -> Option<T>,
    {
        let _guard = WaitGuard::acquire(&self.inner.waiting);
        let deadline = Instant::now() + timeout;
        loop {
            let env = match self.next_until(deadline).await {
                Ok(env) => env,
                Err(e) => {
                    if e == WaitError::Timeout {
                        self.mark_stale();
                    }
                    return Err(e);
                }
            };
            if let Some(found) = select(env) {
                return Ok(found);
            }
            tracing::debug!(session = %self.inner.name, "unrelated message skipped");
        }
    }

    /// Send `msg` and take the very next message as its response.
    pub async fn request<T, F>(&self, msg: impl Into<Message>, timeout: Duration, select: F) -> Result<T, Status>
    where
        F: FnOnce(Envelope) -> Option<T>,
    {
        let started = Instant::now();
        let result = self.exchange(msg.into(), timeout, select).await;
        let status = match &result {
            Ok(_) => Status::Success,
            Err(status) => *status,
        };
        self.inner
            .metrics
            .request_duration
            .observe(&[("status", status.as_str())], started.elapsed());
        result
    }

    async fn exchange<T, F>(&self, msg: Message, timeout: Duration, select: F) -> Result<T, Status>
    where
        F: FnOnce(Envelope) -> Option<T>,
    {
        if !self.send(msg) {
            return Err(Status::FailedToSendRequest);
        }
        let env = self.wait_message(timeout).await?;
        select(env).ok_or_else(|| {
            tracing::warn!(session = %self.inner.name, "unexpected response");
            self.mark_stale();
            Status::UnexpectedResponse
        })
    }

    async fn next_until(&self, deadline: Instant) -> Result<Envelope, WaitError> {
        let (mut env, timestamp) = match self.inner.channel.mode() {
            Mode::Push => self.inner.mailbox.pop_until(deadline).await?,
            Mode::Pull => {
                let left = deadline.saturating_duration_since(Instant::now());
                match self.inner.channel.receive(left).await {
                    Some(item) => item,
                    None if self.inner.channel.is_open() => return Err(WaitError::Timeout),
                    None => return Err(WaitError::Closed),
                }
            }
        };
        if env.timestamp.is_none() {
            env.timestamp = timestamp;
        }
        Ok(env)
    }
}
