//! Global concurrency gate (C7): a process-wide semaphore bounding in-flight
//! upstream calls. Acquire/release is handled by `tokio::sync::OwnedSemaphorePermit`'s
//! RAII drop, so release happens on every exit path — success, error, or the
//! future being dropped under cancellation — without manual bookkeeping.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed")
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permit_is_released_when_dropped() {
        let gate = ConcurrencyGate::new(1);
        assert_eq!(gate.available_permits(), 1);
        {
            let _permit = gate.acquire().await;
            assert_eq!(gate.available_permits(), 0);
        }
        assert_eq!(gate.available_permits(), 1);
    }

    #[tokio::test]
    async fn second_acquire_waits_until_first_releases() {
        let gate = Arc::new(ConcurrencyGate::new(1));
        let permit = gate.acquire().await;

        let gate2 = gate.clone();
        let handle = tokio::spawn(async move {
            let _p = gate2.acquire().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(permit);
        handle.await.unwrap();
    }
}
