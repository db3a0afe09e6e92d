// src/admission.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("admission queue is full ({waiting} waiting)")]
    Busy { waiting: usize },
    #[error("admission queue is closed")]
    Closed,
}

/// Holds one upstream slot. Dropping it releases the slot to the next waiter.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Decrements the wait-line counter however the wait ends, including cancellation.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounds concurrent upstream calls. Waiters are served in FIFO order, which
/// `tokio::sync::Semaphore` guarantees.
#[derive(Debug)]
pub struct AdmissionQueue {
    semaphore: Arc<Semaphore>,
    max_in_flight: usize,
    max_waiting: Option<usize>,
    waiting: AtomicUsize,
}

impl AdmissionQueue {
    /// `max_waiting: None` leaves the wait line unbounded.
    pub fn new(max_in_flight: usize, max_waiting: Option<usize>) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            max_waiting,
            waiting: AtomicUsize::new(0),
        }
    }

    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => return Ok(AdmissionPermit { _permit: permit }),
            Err(TryAcquireError::Closed) => return Err(AdmissionError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let max_waiting = self.max_waiting;
        let joined = self
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| {
                max_waiting.map_or(true, |max| w < max).then_some(w + 1)
            });
        let position = match joined {
            Ok(before) => before + 1,
            Err(waiting) => {
                warn!(waiting, "Admission queue full. Rejecting request.");
                return Err(AdmissionError::Busy { waiting });
            }
        };
        let _guard = WaitingGuard(&self.waiting);
        debug!(position, "All upstream slots busy. Request queued.");

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        Ok(AdmissionPermit { _permit: permit })
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.max_in_flight
    }

    /// Rejects current waiters and every later `acquire` with `Closed`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
