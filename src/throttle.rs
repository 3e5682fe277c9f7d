//! Request Throttle
//!
//! Shared budget for calls to the generation service: a cap on in-flight
//! requests plus an optional minimum spacing between request starts.

use crate::error::{EvalError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

pub struct RequestThrottle {
    permits: Arc<Semaphore>,
    min_interval: Duration,
    next_start: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_interval,
            next_start: Mutex::new(None),
        }
    }

    /// No spacing and effectively no concurrency cap
    pub fn unlimited() -> Self {
        Self::new(Semaphore::MAX_PERMITS, Duration::ZERO)
    }

    /// Wait for a slot. The request may proceed while the permit is held.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| EvalError::Cancelled)?;

        if !self.min_interval.is_zero() {
            let mut next_start = self.next_start.lock().await;
            let now = Instant::now();
            let start = match *next_start {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next_start = Some(start + self.min_interval);
            drop(next_start);
            tokio::time::sleep_until(start).await;
        }

        Ok(permit)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
