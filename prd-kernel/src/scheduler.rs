//! Bounded fan-out of release units with a completion barrier.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Maximum number of units allowed in flight.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    max_concurrency: NonZeroUsize,
}

impl SchedulerConfig {
    /// Creates a new configuration with the supplied concurrency limit.
    #[must_use]
    pub const fn new(max_concurrency: NonZeroUsize) -> Self {
        Self { max_concurrency }
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub const fn max_concurrency(self) -> NonZeroUsize {
        self.max_concurrency
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(16).expect("non-zero"))
    }
}

/// Wrapper around `tokio::spawn` that caps the number of running units.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    semaphore: Arc<Semaphore>,
}

impl TaskScheduler {
    /// Constructs a scheduler using the provided configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrency().get())),
        }
    }

    /// Spawns a unit that starts once a permit is free.
    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            // The semaphore is never closed, so a permit is always granted.
            let permit = semaphore.acquire_owned().await.ok();
            let output = future.await;
            drop(permit);
            output
        })
    }

    /// Spawns every unit and waits until all of them are terminal.
    ///
    /// Results come back in input order. A failing or panicking unit never
    /// cancels its siblings.
    pub async fn run_all<I, F, T>(&self, units: I) -> Vec<SchedulerResult<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = units.into_iter().map(|unit| self.spawn(unit)).collect();
        join_all(handles.into_iter().map(|handle| async move {
            handle.await.map_err(|err| SchedulerError::Join {
                reason: err.to_string(),
            })
        }))
        .await
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

/// Errors produced by the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The unit panicked or was cancelled by the runtime.
    #[error("unit did not complete: {reason}")]
    Join {
        /// Message from the runtime.
        reason: String,
    },
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn respects_max_concurrency() {
        let config = SchedulerConfig::new(NonZeroUsize::new(2).unwrap());
        let scheduler = TaskScheduler::new(config);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let units = (0..3).map(|_| {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        });

        let results = scheduler.run_all(units).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn results_keep_input_order_and_isolate_panics() {
        let scheduler = TaskScheduler::default();
        let units = (0..4u32).map(|value| async move {
            tokio::time::sleep(Duration::from_millis(u64::from(4 - value))).await;
            assert_ne!(value, 2, "unit two fails");
            value
        });

        let results = scheduler.run_all(units).await;
        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Ok(1));
        assert!(matches!(results[2], Err(SchedulerError::Join { .. })));
        assert_eq!(results[3], Ok(3));
    }
}
