use super::cancel::CancelSignal;
use crate::driver::{BrowserContext, BrowserEngine};
use crate::error::PoolError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// An isolated browser context held by exactly one attempt
///
/// The pool slot is returned when the session is dropped, but the context is
/// only closed by [`SessionPool::release`]; always release explicitly.
pub struct Session {
    id: u64,
    context: Box<dyn BrowserContext>,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context(&self) -> &dyn BrowserContext {
        &*self.context
    }
}

/// Snapshot of the pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub live: usize,
    pub peak: usize,
    pub created: usize,
    pub released: usize,
}

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    peak: AtomicUsize,
    created: AtomicUsize,
    released: AtomicUsize,
}

/// Bounded pool of browser sessions. Every acquire creates a fresh context;
/// nothing is reused between attempts.
pub struct SessionPool {
    engine: Arc<dyn BrowserEngine>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    counters: Counters,
    next_id: AtomicU64,
}

impl SessionPool {
    pub fn new(engine: Arc<dyn BrowserEngine>, capacity: usize, acquire_timeout: Duration) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            acquire_timeout,
            counters: Counters::default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Wait for a free slot, then open a new context in it. The whole wait
    /// is bounded by the pool's acquire timeout and by `within`, whichever is
    /// shorter.
    pub async fn acquire(
        &self,
        cancel: &CancelSignal,
        within: Duration,
    ) -> Result<Session, PoolError> {
        let started = Instant::now();
        let limit = self.acquire_timeout.min(within);
        let exhausted = || PoolError::PoolExhausted {
            waited_ms: started.elapsed().as_millis() as u64,
        };

        let permit = tokio::select! {
            result = tokio::time::timeout(limit, self.permits.clone().acquire_owned()) => {
                match result {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(PoolError::Cancelled),
                    Err(_) => return Err(exhausted()),
                }
            }
            _ = cancel.cancelled() => return Err(PoolError::Cancelled),
        };
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let remaining = limit.saturating_sub(started.elapsed());
        let context = match tokio::time::timeout(remaining, self.engine.new_context()).await {
            Ok(context) => context?,
            Err(_) => return Err(exhausted()),
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.counters.created.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(live, Ordering::SeqCst);
        log::debug!("session {} acquired ({} live)", id, live);

        Ok(Session {
            id,
            context,
            _permit: permit,
        })
    }

    /// Close the session's context and free its slot. Close failures are
    /// logged only.
    pub async fn release(&self, session: Session) {
        match tokio::time::timeout(CLOSE_TIMEOUT, session.context.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("failed to close session {}: {}", session.id, e),
            Err(_) => log::warn!("closing session {} timed out", session.id),
        }
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        log::debug!("session {} released", session.id);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live: self.counters.live.load(Ordering::SeqCst),
            peak: self.counters.peak.load(Ordering::SeqCst),
            created: self.counters.created.load(Ordering::SeqCst),
            released: self.counters.released.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::library_app;
    use crate::error::DriverError;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_sessions_are_exclusive_under_contention() {
        let engine = library_app();
        let mock_stats = engine.stats.clone();
        let pool = Arc::new(SessionPool::new(
            Arc::new(engine),
            3,
            Duration::from_secs(10),
        ));
        let in_use = Arc::new(Mutex::new(HashSet::new()));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let cancel = CancelSignal::new();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            let in_use = in_use.clone();
            let concurrent = concurrent.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let session = pool.acquire(&cancel, Duration::MAX).await.unwrap();
                assert!(in_use.lock().unwrap().insert(session.id()));
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                assert!(now <= 3, "{} sessions live", now);

                session
                    .context()
                    .navigate("http://localhost:5000/catalog")
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;

                concurrent.fetch_sub(1, Ordering::SeqCst);
                assert!(in_use.lock().unwrap().remove(&session.id()));
                pool.release(session).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.created, 12);
        assert_eq!(stats.released, 12);
        assert!(stats.peak <= 3 && stats.peak >= 1);
        assert_eq!(mock_stats.open(), 0);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let pool = SessionPool::new(Arc::new(library_app()), 1, Duration::from_millis(50));
        let cancel = CancelSignal::new();
        let held = pool.acquire(&cancel, Duration::MAX).await.unwrap();

        let err = pool.acquire(&cancel, Duration::MAX).await.err().unwrap();
        assert!(matches!(err, PoolError::PoolExhausted { .. }));

        pool.release(held).await;
        let again = pool.acquire(&cancel, Duration::MAX).await.unwrap();
        pool.release(again).await;
    }

    #[tokio::test]
    async fn test_acquire_honours_the_shorter_limit() {
        let pool = SessionPool::new(Arc::new(library_app()), 1, Duration::from_secs(30));
        let cancel = CancelSignal::new();
        let held = pool.acquire(&cancel, Duration::MAX).await.unwrap();

        let started = Instant::now();
        let err = pool
            .acquire(&cancel, Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PoolError::PoolExhausted { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        pool.release(held).await;
    }

    #[tokio::test]
    async fn test_acquire_aborts_on_cancel() {
        let pool = SessionPool::new(Arc::new(library_app()), 1, Duration::from_secs(30));
        let cancel = CancelSignal::new();
        let held = pool.acquire(&cancel, Duration::MAX).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = pool.acquire(&cancel, Duration::MAX).await.err().unwrap();
        assert!(matches!(err, PoolError::Cancelled));
        pool.release(held).await;
    }

    #[tokio::test]
    async fn test_context_failure_returns_slot() {
        let engine = library_app().fail_new_context(DriverError::disconnected("browser crashed"));
        let pool = SessionPool::new(Arc::new(engine), 1, Duration::from_millis(100));
        let cancel = CancelSignal::new();

        let err = pool.acquire(&cancel, Duration::MAX).await.err().unwrap();
        assert!(matches!(err, PoolError::Browser(DriverError::Disconnected(_))));
        assert_eq!(pool.stats().live, 0);

        let session = pool.acquire(&cancel, Duration::MAX).await.unwrap();
        pool.release(session).await;
        assert_eq!(pool.stats().created, 1);
    }
}
