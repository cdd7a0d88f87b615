//! Append-only, size-bounded log of denial events.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

/// Default journal capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

/// A single denial event, purely diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationRecord {
    /// The offending identity.
    pub identity: String,
    /// Name of the policy that denied the request.
    pub policy_name: String,
    /// Endpoint class the request targeted.
    pub endpoint_class: String,
    /// When the denial happened, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Counter value at the moment of denial.
    pub count_at_violation: u64,
}

/// A fixed-capacity ring buffer of recent violations.
///
/// `record` is best-effort and never blocks callers for long or fails: when
/// the buffer is full the oldest entry is evicted. Safe for concurrent
/// `record` from request threads and `recent` reads from a monitoring
/// endpoint. Records never outlive the process.
pub struct ViolationJournal {
    capacity: usize,
    records: Mutex<VecDeque<ViolationRecord>>,
}

impl ViolationJournal {
    /// Create a journal with the given capacity. A zero capacity journal
    /// drops everything.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a violation, evicting the oldest entry when full.
    pub fn record(&self, record: ViolationRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// The most recent violations, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ViolationRecord> {
        let records = self.records.lock();
        records.iter().rev().take(limit).cloned().collect()
    }

    /// Discard all recorded violations.
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the journal holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ViolationJournal {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identity: &str, timestamp_ms: u64) -> ViolationRecord {
        ViolationRecord {
            identity: identity.to_string(),
            policy_name: "api-free".to_string(),
            endpoint_class: "api".to_string(),
            timestamp_ms,
            count_at_violation: 101,
        }
    }

    #[test]
    fn test_recent_is_newest_first() {
        let journal = ViolationJournal::new(10);
        journal.record(record("a", 1));
        journal.record(record("b", 2));
        journal.record(record("c", 3));

        let recent = journal.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].identity, "c");
        assert_eq!(recent[1].identity, "b");
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let journal = ViolationJournal::new(3);
        for i in 0..5 {
            journal.record(record(&format!("id-{}", i), i));
        }

        assert_eq!(journal.len(), 3);
        let recent = journal.recent(10);
        assert_eq!(recent[0].identity, "id-4");
        assert_eq!(recent[2].identity, "id-2");
    }

    #[test]
    fn test_zero_capacity_drops_silently() {
        let journal = ViolationJournal::new(0);
        journal.record(record("a", 1));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_clear() {
        let journal = ViolationJournal::new(10);
        journal.record(record("a", 1));
        journal.clear();
        assert!(journal.is_empty());
        assert_eq!(journal.capacity(), 10);
    }

    #[test]
    fn test_concurrent_record_keeps_capacity_bound() {
        use std::sync::Arc;
        let journal = Arc::new(ViolationJournal::new(100));
        let mut handles = Vec::new();
        for t in 0..8 {
            let journal = journal.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..200 {
                    journal.record(record(&format!("t{}-{}", t, i), i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(journal.len(), 100);
    }
}
