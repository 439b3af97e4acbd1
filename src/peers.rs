use std::collections::HashMap;
use std::sync::Mutex;

/// Concurrent roster of remote nodes, keyed by endpoint address with the
/// peer's cached numeric id as the value.
///
/// Reads go through `snapshot()` which copies the map under the lock, so
/// iteration never observes a mid-mutation state. Writes are
/// unconditional upserts; stale entries are tolerated and simply make
/// the next RPC to that address fail.
#[derive(Debug, Default)]
pub struct PeerSet {
    inner: Mutex<HashMap<String, u64>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, addr: String, id: u64) {
        self.inner.lock().unwrap().insert(addr, id);
    }

    pub fn remove(&self, addr: &str) {
        self.inner.lock().unwrap().remove(addr);
    }

    /// Consistent copy of the roster, sorted by address so iteration
    /// order is stable across calls.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .inner
            .lock()
            .unwrap()
            .iter()
            .map(|(addr, id)| (addr.clone(), *id))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_overwrites() {
        let peers = PeerSet::new();
        peers.insert("127.0.0.1:7101".to_string(), 1);
        peers.insert("127.0.0.1:7101".to_string(), 5);

        assert_eq!(peers.len(), 1);
        assert_eq!(peers.snapshot(), vec![("127.0.0.1:7101".to_string(), 5)]);
    }

    #[test]
    fn test_snapshot_is_stable_copy() {
        let peers = PeerSet::new();
        peers.insert("127.0.0.1:7102".to_string(), 2);
        peers.insert("127.0.0.1:7101".to_string(), 1);

        let snap = peers.snapshot();
        peers.insert("127.0.0.1:7103".to_string(), 3);

        // The earlier snapshot does not see the later write
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].0, "127.0.0.1:7101");
        assert_eq!(snap[1].0, "127.0.0.1:7102");
        assert_eq!(peers.len(), 3);
    }

    #[test]
    fn test_repeated_population_is_idempotent() {
        let peers = PeerSet::new();
        for _ in 0..3 {
            peers.insert("127.0.0.1:7101".to_string(), 1);
            peers.insert("127.0.0.1:7102".to_string(), 2);
        }
        assert_eq!(peers.len(), 2);
    }
}
