//! Async mutual-exclusion lock with FIFO hand-off
//!
//! The lock is released by dropping (or calling [`LockGuard::release`] on) the
//! guard returned from an acquire call, so a release without a matching
//! acquire cannot be expressed.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::{McpError, McpResult};

/// A FIFO async lock
#[derive(Clone)]
pub struct Lock {
    name: Arc<str>,
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
}

/// Proof of holding a [`Lock`]. The lock is released when this is dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard {
    _permit: OwnedSemaphorePermit,
}

impl LockGuard {
    /// Release the lock explicitly
    pub fn release(self) {}
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Lock {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            permits: Arc::new(Semaphore::new(1)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the lock is granted. Waiters are served in arrival order.
    pub async fn acquire(&self) -> McpResult<LockGuard> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaitingGuard(&self.waiting);
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| McpError::cancelled(format!("lock '{}' was closed", self.name), None))?;
        Ok(LockGuard { _permit: permit })
    }

    /// Grab the lock only if it is free right now
    pub fn try_acquire(&self) -> Option<LockGuard> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Some(LockGuard { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    /// Like [`Lock::acquire`] but gives up with a timeout error after `timeout`
    pub async fn acquire_with_timeout(&self, timeout: Duration) -> McpResult<LockGuard> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(guard) => guard,
            Err(_) => Err(McpError::timeout(
                format!("lock '{}' not granted in time", self.name),
                timeout,
            )),
        }
    }

    /// Run `fut` while holding the lock. The lock is released however `fut`
    /// finishes, including by panic or by the caller dropping the future.
    pub async fn with_lock<F, T>(&self, fut: F) -> McpResult<T>
    where
        F: Future<Output = McpResult<T>>,
    {
        let _guard = self.acquire().await?;
        fut.await
    }

    pub fn is_locked(&self) -> bool {
        self.permits.available_permits() == 0
    }

    /// Number of callers currently waiting in [`Lock::acquire`]
    pub fn queue_length(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .field("queue_length", &self.queue_length())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_try_acquire_fails_while_held() {
        let lock = Lock::new("test");
        let guard = lock.try_acquire().unwrap();
        assert!(lock.is_locked());
        assert!(lock.try_acquire().is_none());
        guard.release();
        assert!(!lock.is_locked());
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_acquire_with_timeout_fires_at_bound() {
        let lock = Lock::new("held");
        let guard = lock.acquire().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(guard);
        });

        let started = Instant::now();
        let err = lock
            .acquire_with_timeout(Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        let elapsed = started.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_millis(45), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(180), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let lock = Lock::new("err");
        let result: McpResult<()> = lock
            .with_lock(async { Err(McpError::transport("boom")) })
            .await;
        assert!(result.is_err());
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_panic() {
        let lock = Lock::new("panic");
        let cloned = lock.clone();
        let handle = tokio::spawn(async move {
            cloned
                .with_lock(async {
                    panic!("unit panicked");
                    #[allow(unreachable_code)]
                    Ok(())
                })
                .await
        });
        assert!(handle.await.is_err());
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_order() {
        let lock = Lock::new("fifo");
        let guard = lock.acquire().await.unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let waiter = lock.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _g = waiter.acquire().await.unwrap();
                order.lock().push(i);
            }));
            // Make sure waiter i is queued before waiter i + 1.
            while lock.queue_length() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(guard);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }
}
