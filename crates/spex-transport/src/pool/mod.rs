//! Per-kind session pool with retrying acquisition.
//!
//! A session goes back to the pool only when its call ran to completion and
//! left no reply outstanding. A session whose call was cancelled, panicked,
//! or timed out is closed instead: a late response may still be in flight.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use spex_core::Status;

use crate::channel::lock;
use crate::correlator::Correlator;
use crate::obs::TransportMetrics;

/// Opens a fresh session for a given kind.
#[async_trait]
pub trait SessionFactory<K, S>: Send + Sync {
    async fn open(&self, kind: &K) -> Result<S, Status>;
}

pub trait PooledSession: Clone + Send + Sync + 'static {
    fn is_open(&self) -> bool;
    fn close(&self);

    /// Whether the next borrower can start a fresh exchange on it.
    fn is_reusable(&self) -> bool {
        self.is_open()
    }
}

impl PooledSession for Correlator {
    fn is_open(&self) -> bool {
        Correlator::is_open(self)
    }

    fn is_reusable(&self) -> bool {
        Correlator::is_open(self) && !self.is_stale()
    }

    fn close(&self) {
        Correlator::close(self)
    }
}

/// What happens to a session after a call completed normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// Returned to the pool.
    Reusable,
    /// Kept by the caller (e.g. a long-lived subscription); never returned.
    Exclusive,
}

pub struct SessionPool<K, S> {
    name: String,
    idle: Mutex<HashMap<K, Vec<S>>>,
    factory: Arc<dyn SessionFactory<K, S>>,
    retries: usize,
    metrics: Arc<TransportMetrics>,
}

impl<K, S> SessionPool<K, S>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync,
    S: PooledSession,
{
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn SessionFactory<K, S>>,
        retries: usize,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            name: name.into(),
            idle: Mutex::new(HashMap::new()),
            factory,
            retries: retries.max(1),
            metrics,
        }
    }

    /// Reuse an idle session or open a new one, trying the factory up to
    /// `retries` times.
    pub async fn acquire(&self, kind: &K) -> Result<Lease<'_, K, S>, Status> {
        if let Some(session) = self.take_idle(kind) {
            return Ok(Lease::new(self, kind.clone(), session));
        }

        let label = kind.to_string();
        for attempt in 1..=self.retries {
            match self.factory.open(kind).await {
                Ok(session) => {
                    self.metrics.sessions_opened.inc(&[("kind", label.as_str())]);
                    return Ok(Lease::new(self, kind.clone(), session));
                }
                Err(status) => {
                    self.metrics.open_failures.inc(&[("kind", label.as_str())]);
                    tracing::warn!(
                        pool = %self.name,
                        kind = %label,
                        attempt,
                        retries = self.retries,
                        %status,
                        "failed to open session"
                    );
                }
            }
        }
        Err(Status::Unreachable)
    }

    /// Run `f` on a pooled session.
    ///
    /// Returns `unreachable` without calling `f` if no session could be
    /// acquired. Dropping the returned future mid-call closes the session.
    pub async fn with_session<T, F, Fut>(&self, kind: &K, usage: Usage, unreachable: T, f: F) -> T
    where
        F: FnOnce(S) -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = match self.acquire(kind).await {
            Ok(lease) => lease,
            Err(status) => {
                tracing::warn!(pool = %self.name, kind = %kind, %status, "no session available");
                return unreachable;
            }
        };
        let out = f(lease.session().clone()).await;
        lease.release(usage);
        out
    }

    /// Like `with_session`, but gives up with `canceled` as soon as `cancel`
    /// resolves. The interrupted session is discarded.
    pub async fn with_session_or_cancel<T, F, Fut, C>(
        &self,
        kind: &K,
        usage: Usage,
        unreachable: T,
        canceled: T,
        cancel: C,
        f: F,
    ) -> T
    where
        F: FnOnce(S) -> Fut,
        Fut: Future<Output = T>,
        C: Future<Output = ()>,
    {
        tokio::select! {
            out = self.with_session(kind, usage, unreachable, f) => out,
            _ = cancel => {
                tracing::debug!(pool = %self.name, kind = %kind, "call canceled");
                canceled
            }
        }
    }

    /// Number of idle sessions for `kind`.
    pub fn idle_count(&self, kind: &K) -> usize {
        lock(&self.idle).get(kind).map(Vec::len).unwrap_or(0)
    }

    /// Close every idle session.
    pub fn close_idle(&self) {
        let drained: Vec<S> = lock(&self.idle).drain().flat_map(|(_, v)| v).collect();
        for session in drained {
            session.close();
        }
    }

    fn take_idle(&self, kind: &K) -> Option<S> {
        let mut idle = lock(&self.idle);
        let list = idle.get_mut(kind)?;
        while let Some(session) = list.pop() {
            if session.is_reusable() {
                return Some(session);
            }
            session.close();
        }
        None
    }

    fn put_back(&self, kind: K, session: S) {
        if !session.is_open() {
            return;
        }
        if !session.is_reusable() {
            self.discard(&kind, session);
            return;
        }
        lock(&self.idle).entry(kind).or_default().push(session);
    }

    fn discard(&self, kind: &K, session: S) {
        self.metrics
            .sessions_discarded
            .inc(&[("kind", kind.to_string().as_str())]);
        tracing::debug!(pool = %self.name, kind = %kind, "discarding session");
        session.close();
    }
}

/// A session on loan from the pool.
///
/// Dropping a lease without `release` closes the session.
pub struct Lease<'p, K, S>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync,
    S: PooledSession,
{
    pool: &'p SessionPool<K, S>,
    kind: K,
    session: Option<S>,
}

impl<'p, K, S> Lease<'p, K, S>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync,
    S: PooledSession,
{
    fn new(pool: &'p SessionPool<K, S>, kind: K, session: S) -> Self {
        Self {
            pool,
            kind,
            session: Some(session),
        }
    }

    pub fn session(&self) -> &S {
        match &self.session {
            Some(session) => session,
            None => unreachable!("lease already released"),
        }
    }

    /// End the loan after a normal completion. Returns the session for
    /// `Exclusive` use.
    pub fn release(mut self, usage: Usage) -> Option<S> {
        let session = self.session.take()?;
        match usage {
            Usage::Reusable => {
                self.pool.put_back(self.kind.clone(), session);
                None
            }
            Usage::Exclusive => Some(session),
        }
    }
}

impl<K, S> Drop for Lease<'_, K, S>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync,
    S: PooledSession,
{
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.discard(&self.kind, session);
        }
    }
}
