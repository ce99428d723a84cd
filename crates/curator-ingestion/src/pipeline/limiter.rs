use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::stage::Stage;
use crate::error::StageError;

/// Counting limiter for one stage, tracking how many holders it has and the
/// most it ever had at once.
#[derive(Debug)]
pub struct StageLimiter {
    stage: Stage,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl StageLimiter {
    /// Capacity is clamped to `Semaphore::MAX_PERMITS`.
    pub fn new(stage: Stage, capacity: usize) -> Self {
        Self {
            stage,
            semaphore: Arc::new(Semaphore::new(capacity.min(Semaphore::MAX_PERMITS))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        }
    }

    /// Wait for a slot. The slot is released when the permit drops, so a
    /// permit moved onto another thread keeps the slot until that work ends.
    pub async fn acquire(&self) -> Result<StagePermit, StageError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StageError::Unavailable(format!("{} limiter closed", self.stage)))?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(StagePermit { _permit: permit, in_flight: self.in_flight.clone() })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A held slot of a [`StageLimiter`].
#[derive(Debug)]
pub struct StagePermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for StagePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_peak_never_exceeds_capacity() {
        let limiter = Arc::new(StageLimiter::new(Stage::Fetch, 2));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(limiter.peak(), 2);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_permit_drop_releases_slot() {
        let limiter = StageLimiter::new(Stage::Parse, 1);
        {
            let _p = limiter.acquire().await.unwrap();
            assert_eq!(limiter.in_flight(), 1);
        }
        let _again = limiter.acquire().await.unwrap();
        assert_eq!(limiter.peak(), 1);
    }

    #[tokio::test]
    async fn test_oversized_capacity_is_clamped() {
        let limiter = StageLimiter::new(Stage::Fetch, usize::MAX);
        let _p = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_permit_moved_to_blocking_thread_holds_slot() {
        let limiter = StageLimiter::new(Stage::Parse, 1);
        let permit = limiter.acquire().await.unwrap();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            std::thread::sleep(Duration::from_millis(50));
        });
        assert_eq!(limiter.in_flight(), 1);
        handle.await.unwrap();
        assert_eq!(limiter.in_flight(), 0);
    }
}
