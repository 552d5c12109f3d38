#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spex_core::Status;
use spex_transport::obs::TransportMetrics;
use spex_transport::pool::{PooledSession, SessionFactory, SessionPool, Usage};

#[derive(Clone)]
struct FakeSession {
    id: usize,
    open: Arc<AtomicBool>,
    stale: Arc<AtomicBool>,
}

impl PooledSession for FakeSession {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_reusable(&self) -> bool {
        self.is_open() && !self.stale.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct CountingFactory {
    attempts: AtomicUsize,
    fail_first: AtomicUsize,
    opened: Mutex<Vec<FakeSession>>,
}

impl CountingFactory {
    fn failing(n: usize) -> Self {
        let f = Self::default();
        f.fail_first.store(n, Ordering::SeqCst);
        f
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn opened(&self) -> Vec<FakeSession> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionFactory<&'static str, FakeSession> for CountingFactory {
    async fn open(&self, _kind: &&'static str) -> Result<FakeSession, Status> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Status::ModuleOffline);
        }
        let mut opened = self.opened.lock().unwrap();
        let session = FakeSession {
            id: opened.len() + 1,
            open: Arc::new(AtomicBool::new(true)),
            stale: Arc::new(AtomicBool::new(false)),
        };
        opened.push(session.clone());
        Ok(session)
    }
}

const ENGINE: &str = "engine";

fn pool(factory: &Arc<CountingFactory>, retries: usize) -> (SessionPool<&'static str, FakeSession>, Arc<TransportMetrics>) {
    let metrics = Arc::new(TransportMetrics::default());
    let factory: Arc<dyn SessionFactory<&'static str, FakeSession>> = factory.clone();
    (SessionPool::new("test", factory, retries, Arc::clone(&metrics)), metrics)
}

#[tokio::test]
async fn sequential_calls_reuse_one_session() {
    let factory = Arc::new(CountingFactory::default());
    let (pool, metrics) = pool(&factory, 3);

    let first = pool
        .with_session(&ENGINE, Usage::Reusable, None, |s| async move { Some(s.id) })
        .await;
    let second = pool
        .with_session(&ENGINE, Usage::Reusable, None, |s| async move { Some(s.id) })
        .await;

    assert_eq!(first, Some(1));
    assert_eq!(second, Some(1));
    assert_eq!(factory.attempts(), 1);
    assert_eq!(pool.idle_count(&ENGINE), 1);
    assert_eq!(metrics.sessions_opened.get(&[("kind", "engine")]), 1);
}

#[tokio::test]
async fn sessions_left_out_of_step_are_closed_not_pooled() {
    let factory = Arc::new(CountingFactory::default());
    let (pool, metrics) = pool(&factory, 3);

    let first = pool
        .with_session(&ENGINE, Usage::Reusable, None, |s| async move {
            s.stale.store(true, Ordering::SeqCst);
            Some(s.id)
        })
        .await;
    assert_eq!(first, Some(1));
    assert_eq!(pool.idle_count(&ENGINE), 0);
    assert!(!factory.opened()[0].is_open());
    assert_eq!(metrics.sessions_discarded.get(&[("kind", "engine")]), 1);

    let second = pool
        .with_session(&ENGINE, Usage::Reusable, None, |s| async move { Some(s.id) })
        .await;
    assert_eq!(second, Some(2));
}

#[tokio::test]
async fn exclusive_sessions_are_never_returned() {
    let factory = Arc::new(CountingFactory::default());
    let (pool, _) = pool(&factory, 3);

    pool.with_session(&ENGINE, Usage::Exclusive, (), |_| async {}).await;
    assert_eq!(pool.idle_count(&ENGINE), 0);
    assert!(factory.opened()[0].is_open());

    pool.with_session(&ENGINE, Usage::Reusable, (), |_| async {}).await;
    assert_eq!(factory.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_call_discards_its_session() {
    let factory = Arc::new(CountingFactory::default());
    let (pool, metrics) = pool(&factory, 3);

    let call = pool.with_session(&ENGINE, Usage::Reusable, (), |_| async {
        std::future::pending::<()>().await
    });
    assert!(tokio::time::timeout(Duration::from_millis(100), call).await.is_err());

    assert_eq!(pool.idle_count(&ENGINE), 0);
    assert!(!factory.opened()[0].is_open());
    assert_eq!(metrics.sessions_discarded.get(&[("kind", "engine")]), 1);

    let id = pool
        .with_session(&ENGINE, Usage::Reusable, 0, |s| async move { s.id })
        .await;
    assert_eq!(id, 2);
    assert_eq!(factory.attempts(), 2);
}

#[tokio::test]
async fn dropped_lease_closes_the_session() {
    let factory = Arc::new(CountingFactory::default());
    let (pool, _) = pool(&factory, 3);

    let lease = pool.acquire(&ENGINE).await.unwrap();
    assert!(lease.session().is_open());
    drop(lease);

    assert!(!factory.opened()[0].is_open());
    assert_eq!(pool.idle_count(&ENGINE), 0);
}

#[tokio::test]
async fn panicking_call_discards_its_session() {
    let factory = Arc::new(CountingFactory::default());
    let (pool, _) = pool(&factory, 3);
    let pool = Arc::new(pool);

    let task_pool = Arc::clone(&pool);
    let joined = tokio::spawn(async move {
        task_pool
            .with_session(&ENGINE, Usage::Reusable, (), |_| async { panic!("boom") })
            .await
    })
    .await;

    assert!(joined.unwrap_err().is_panic());
    assert!(!factory.opened()[0].is_open());
    assert_eq!(pool.idle_count(&ENGINE), 0);
}

#[tokio::test]
async fn exhausted_retries_return_the_fallback() {
    let factory = Arc::new(CountingFactory::failing(usize::MAX));
    let (pool, metrics) = pool(&factory, 3);

    let called = AtomicBool::new(false);
    let out = pool
        .with_session(&ENGINE, Usage::Reusable, Err(Status::Unreachable), |_| async {
            called.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert_eq!(out, Err(Status::Unreachable));
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(factory.attempts(), 3);
    assert_eq!(metrics.open_failures.get(&[("kind", "engine")]), 3);
    assert!(matches!(pool.acquire(&ENGINE).await, Err(Status::Unreachable)));
}

#[tokio::test]
async fn failed_attempts_are_retried_immediately() {
    let factory = Arc::new(CountingFactory::failing(2));
    let (pool, _) = pool(&factory, 3);

    let id = pool
        .with_session(&ENGINE, Usage::Reusable, 0, |s| async move { s.id })
        .await;
    assert_eq!(id, 1);
    assert_eq!(factory.attempts(), 3);
}

#[tokio::test]
async fn closed_idle_sessions_are_skipped() {
    let factory = Arc::new(CountingFactory::default());
    let (pool, _) = pool(&factory, 3);

    pool.with_session(&ENGINE, Usage::Reusable, (), |_| async {}).await;
    factory.opened()[0].close();

    let id = pool
        .with_session(&ENGINE, Usage::Reusable, 0, |s| async move { s.id })
        .await;
    assert_eq!(id, 2);
    assert_eq!(pool.idle_count(&ENGINE), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_cancel_yields_the_canceled_value() {
    let factory = Arc::new(CountingFactory::default());
    let (pool, _) = pool(&factory, 3);

    let out = pool
        .with_session_or_cancel(
            &ENGINE,
            Usage::Reusable,
            Err(Status::Unreachable),
            Err(Status::Canceled),
            tokio::time::sleep(Duration::from_millis(50)),
            |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
        )
        .await;

    assert_eq!(out, Err(Status::Canceled));
    assert!(!factory.opened()[0].is_open());
    assert_eq!(pool.idle_count(&ENGINE), 0);
}

#[tokio::test]
async fn kinds_are_pooled_separately() {
    let factory = Arc::new(CountingFactory::default());
    let (pool, _) = pool(&factory, 3);

    pool.with_session(&"engine", Usage::Reusable, (), |_| async {}).await;
    pool.with_session(&"shipyard", Usage::Reusable, (), |_| async {}).await;
    assert_eq!(factory.attempts(), 2);

    pool.close_idle();
    assert!(factory.opened().iter().all(|s| !s.is_open()));
    assert_eq!(pool.idle_count(&"engine"), 0);
}
