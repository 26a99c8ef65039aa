// Recently-committed roots decoded to memory so a new transaction can
// start from hot data, evicted LRU to a configured byte budget (spec
// §4.3.4). `RootServer` stores each successful commit's encoded
// `CommitOutcome`, keyed by the root it produced, so a commit retried after
// a lost response replays the same answer and `begin_transaction` can
// report the commit id a still-warm base root came from — this crate only
// owns the eviction policy, not the value's shape.

use std::collections::HashMap;

use mckoi_net::NodeId;

/// Default transaction cache budget (spec §4.3: "default 14 MB").
pub const DEFAULT_BUDGET_BYTES: u64 = 14 * 1024 * 1024;

struct Entry {
    bytes: Vec<u8>,
    // Monotonic "clock" used only to order entries by recency; simpler than
    // threading an intrusive LRU list through a hash map for a cache this
    // small.
    last_used: u64,
}

pub struct TransactionCache {
    budget_bytes: u64,
    used_bytes: u64,
    clock: u64,
    entries: HashMap<NodeId, Entry>,
}

impl TransactionCache {
    pub fn new(budget_bytes: u64) -> Self {
        TransactionCache { budget_bytes, used_bytes: 0, clock: 0, entries: HashMap::new() }
    }

    pub fn get(&mut self, root: NodeId) -> Option<&[u8]> {
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entries.get_mut(&root)?;
        entry.last_used = clock;
        Some(&entry.bytes)
    }

    pub fn put(&mut self, root: NodeId, bytes: Vec<u8>) {
        self.clock += 1;
        let size = bytes.len() as u64;
        if let Some(old) = self.entries.remove(&root) {
            self.used_bytes -= old.bytes.len() as u64;
        }
        self.used_bytes += size;
        self.entries.insert(root, Entry { bytes, last_used: self.clock });
        self.evict_to_budget();
    }

    fn evict_to_budget(&mut self) {
        while self.used_bytes > self.budget_bytes && !self.entries.is_empty() {
            let lru_key = *self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k)
                .expect("non-empty checked above");
            if let Some(evicted) = self.entries.remove(&lru_key) {
                self.used_bytes -= evicted.bytes.len() as u64;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_get_put_roundtrip() {
        let mut cache = TransactionCache::new(DEFAULT_BUDGET_BYTES);
        let root = NodeId::from_permanent(1);
        cache.put(root, vec![1, 2, 3]);
        assert_eq!(cache.get(root), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn test_lru_eviction_under_budget_pressure() {
        let mut cache = TransactionCache::new(10);
        cache.put(NodeId::from_permanent(1), vec![0; 6]);
        cache.put(NodeId::from_permanent(2), vec![0; 6]);
        // First entry is least-recently-used once the second is inserted.
        assert!(cache.get(NodeId::from_permanent(1)).is_none());
        assert!(cache.get(NodeId::from_permanent(2)).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_recently_read_entry_survives_eviction() {
        let mut cache = TransactionCache::new(15);
        let a = NodeId::from_permanent(1);
        let b = NodeId::from_permanent(2);
        let c = NodeId::from_permanent(3);
        cache.put(a, vec![0; 6]);
        cache.put(b, vec![0; 6]);
        cache.get(a); // bump a's recency above b's
        cache.put(c, vec![0; 6]); // pushes used bytes over budget; b is now the LRU
        assert!(cache.get(a).is_some());
        assert!(cache.get(b).is_none());
        assert!(cache.get(c).is_some());
    }
}
