use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore that bounds concurrently open pages and records how
/// many were open at once.
#[derive(Debug)]
pub struct FetchGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Held for the lifetime of one page. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl FetchGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Waits until a slot is free.
    pub async fn acquire(&self) -> GatePermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("fetch gate semaphore is never closed");

        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);

        GatePermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at the same time since creation.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn peak_never_exceeds_capacity() {
        let gate = Arc::new(FetchGate::new(4));

        let handles: Vec<_> = (0..4 + 6)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    let _permit = gate.acquire().await;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(gate.peak(), 4);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn permit_is_released_when_task_fails() {
        let gate = Arc::new(FetchGate::new(1));

        let failing = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _permit = gate.acquire().await;
                panic!("page blew up");
            })
        };
        assert!(failing.await.is_err());

        assert_eq!(gate.in_flight(), 0);
        let permit = tokio::time::timeout(Duration::from_secs(1), gate.acquire()).await;
        assert!(permit.is_ok());
    }

    #[test]
    fn acquire_waits_while_saturated() {
        let gate = FetchGate::new(1);
        let held = tokio_test::block_on(gate.acquire());

        let mut waiting = tokio_test::task::spawn(gate.acquire());
        tokio_test::assert_pending!(waiting.poll());
        assert_eq!(gate.in_flight(), 1);

        drop(held);
        assert!(waiting.is_woken());
        let _permit = tokio_test::assert_ready!(waiting.poll());
        assert_eq!(gate.in_flight(), 1);
        assert_eq!(gate.peak(), 1);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(FetchGate::new(0).capacity(), 1);
    }
}
