use std::sync::atomic::{AtomicU64, Ordering};

/// Lamport logical clock.
///
/// Every outbound coordination RPC carries the value observed after a
/// `tick()`; every inbound handler calls `merge()` with the remote value
/// before acting. All operations are linearizable.
#[derive(Debug, Default)]
pub struct LamportClock {
    value: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically increment the clock and return the new value.
    pub fn tick(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Apply the receive rule `C <- max(C, remote) + 1` and return the
    /// new value.
    pub fn merge(&self, remote: u64) -> u64 {
        let mut current = self.value.load(Ordering::SeqCst);
        loop {
            let next = current.max(remote) + 1;
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_increments() {
        let clock = LamportClock::new();
        assert_eq!(clock.get(), 0);
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.get(), 2);
    }

    #[test]
    fn test_merge_takes_max_plus_one() {
        let clock = LamportClock::new();
        clock.tick();
        clock.tick();

        // Remote behind: still advances past our own value
        assert_eq!(clock.merge(0), 3);
        // Remote ahead: jumps past the remote value
        assert_eq!(clock.merge(10), 11);
        assert_eq!(clock.get(), 11);
    }

    #[test]
    fn test_merge_always_exceeds_remote() {
        let clock = LamportClock::new();
        for remote in [5u64, 3, 17, 17, 2] {
            let merged = clock.merge(remote);
            assert!(merged > remote);
            assert!(merged > 0);
        }
    }

    #[test]
    fn test_monotonic_under_contention() {
        use std::sync::Arc;

        let clock = Arc::new(LamportClock::new());
        let mut handles = Vec::new();
        for i in 0..4u64 {
            let clock = clock.clone();
            handles.push(std::thread::spawn(move || {
                let mut last = 0;
                for j in 0..1_000 {
                    let v = if j % 2 == 0 {
                        clock.tick()
                    } else {
                        clock.merge(i * 1_000 + j)
                    };
                    assert!(v > last);
                    last = v;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
