//! Bounded pool of browser sessions
//!
//! Sessions are expensive to build, so released sessions are parked and
//! handed out again. The idle list never holds more than `capacity`
//! sessions; anything released beyond that is destroyed.

pub mod chrome;

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::traits::DriverFactory;

pub struct DriverPool<F: DriverFactory> {
    factory: F,
    idle: Mutex<Vec<F::Driver>>,
    capacity: usize,
    closed: AtomicBool,
}

impl<F: DriverFactory> DriverPool<F> {
    pub fn new(factory: F, capacity: usize) -> Self {
        Self {
            factory,
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<F::Driver>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrows an idle session, or creates a fresh one when none is parked.
    ///
    /// The pool lock is never held while a session is being created.
    pub async fn acquire(&self) -> Result<F::Driver> {
        let parked = self.lock_idle().pop();
        if let Some(driver) = parked {
            debug!("Reusing pooled browser session");
            return Ok(driver);
        }

        debug!("Creating new browser session");
        self.factory
            .create()
            .await
            .context("Failed to create browser session")
    }

    /// Returns a session to the pool, destroying it if the pool is full or closed.
    pub async fn release(&self, driver: F::Driver) {
        let overflow = {
            let mut idle = self.lock_idle();
            if !self.closed.load(Ordering::SeqCst) && idle.len() < self.capacity {
                idle.push(driver);
                None
            } else {
                Some(driver)
            }
        };

        if let Some(driver) = overflow {
            debug!("Pool full or closed, destroying browser session");
            self.discard(driver).await;
        }
    }

    /// Destroys a session without returning it; failures are logged and swallowed.
    pub async fn discard(&self, driver: F::Driver) {
        if let Err(e) = self.factory.destroy(driver).await {
            warn!("Failed to destroy browser session: {:#}", e);
        }
    }

    /// Closes the pool and destroys every parked session.
    ///
    /// Sessions still borrowed are destroyed when they are released.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained = std::mem::take(&mut *self.lock_idle());
        let count = drained.len();
        for driver in drained {
            self.discard(driver).await;
        }
        info!("Driver pool closed, {} idle sessions destroyed", count);
    }

    /// Lets released sessions be parked again after a [`shutdown`](Self::shutdown).
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeFactory;
    use std::collections::HashMap;

    fn pool(capacity: usize) -> (FakeFactory, DriverPool<FakeFactory>) {
        let factory = FakeFactory::new(HashMap::new());
        (factory.clone(), DriverPool::new(factory, capacity))
    }

    #[tokio::test]
    async fn released_sessions_are_reused() {
        let (factory, pool) = pool(2);

        let driver = pool.acquire().await.unwrap();
        pool.release(driver).await;
        let _again = pool.acquire().await.unwrap();

        assert_eq!(factory.created(), 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn idle_list_never_exceeds_capacity() {
        let (factory, pool) = pool(2);

        let mut borrowed = Vec::new();
        for _ in 0..5 {
            borrowed.push(pool.acquire().await.unwrap());
        }
        assert_eq!(factory.live(), 5);

        for driver in borrowed {
            pool.release(driver).await;
            assert!(pool.idle_count() <= pool.capacity());
        }

        assert_eq!(pool.idle_count(), 2);
        assert_eq!(factory.destroyed(), 3);
        assert_eq!(factory.live(), 2);
    }

    #[tokio::test]
    async fn destroy_failures_are_swallowed() {
        let (factory, pool) = pool(0);
        factory.fail_destroy(true);

        let driver = pool.acquire().await.unwrap();
        pool.release(driver).await;

        assert_eq!(factory.destroyed(), 1);
        assert_eq!(factory.live(), 0);
    }

    #[tokio::test]
    async fn create_failure_is_reported() {
        let (factory, pool) = pool(1);
        factory.fail_create(true);

        assert!(pool.acquire().await.is_err());

        factory.fail_create(false);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_destroys_idle_and_late_releases() {
        let (factory, pool) = pool(2);
        let parked = pool.acquire().await.unwrap();
        let borrowed = pool.acquire().await.unwrap();
        pool.release(parked).await;

        pool.shutdown().await;
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(factory.live(), 1);

        pool.release(borrowed).await;
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(factory.live(), 0);

        pool.reopen();
        let driver = pool.acquire().await.unwrap();
        pool.release(driver).await;
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_borrowers_get_distinct_sessions() {
        let (factory, pool) = pool(3);
        let pool = std::sync::Arc::new(pool);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let pool = std::sync::Arc::clone(&pool);
            tasks.spawn(async move {
                let driver = pool.acquire().await.unwrap();
                tokio::task::yield_now().await;
                pool.release(driver).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        assert!(pool.idle_count() <= 3);
        assert_eq!(factory.live(), pool.idle_count());
    }
}
