//! Server-resident session table
//!
//! The one piece of mutable state every worker shares. A single mutex
//! guards the whole table, so existence checks and mutations are linearized:
//! two calls racing to create the same session id see exactly one success.
//! Capacity is enforced at insert time by evicting the least-recently
//! touched percentage of records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use parley_core::errors::{ParleyError, Result, SessionError};
use parley_core::{SystemTimeSource, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Session Record
// ----------------------------------------------------------------------------

/// One live session. Created by `add`, touched on every hit, removed only
/// by eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Client-chosen identifier, trim-normalized
    pub session_id: String,
    /// Client's public key, set once at creation
    pub client_public_key: String,
    /// Updated on every successful lookup or existence check
    pub last_modified: Timestamp,
}

// ----------------------------------------------------------------------------
// Session Store
// ----------------------------------------------------------------------------

/// Capacity-bounded session table with recency eviction
pub struct SessionStore {
    records: Mutex<HashMap<String, SessionRecord>>,
    max_sessions: usize,
    evict_percent: u8,
    time_source: Arc<dyn TimeSource>,
}

impl SessionStore {
    pub fn new(max_sessions: usize, evict_percent: u8, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
            evict_percent,
            time_source,
        }
    }

    /// Store with the wall clock and the given limits
    pub fn with_limits(max_sessions: usize, evict_percent: u8) -> Self {
        Self::new(max_sessions, evict_percent, Arc::new(SystemTimeSource))
    }

    /// Register a new session.
    ///
    /// Returns `false` without mutating anything when the normalized id is
    /// already present or empty. When the store is at capacity, the
    /// configured eviction pass runs before the insert.
    pub fn add(&self, session_id: &str, client_public_key: &str) -> bool {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return false;
        }
        let mut records = self.lock();
        if records.contains_key(session_id) {
            return false;
        }
        if records.len() >= self.max_sessions {
            // Small stores floor the percentage to zero; the insert still
            // needs room, so at least one record goes.
            let count = Self::eviction_count(records.len(), self.evict_percent).max(1);
            let removed = Self::evict_locked(&mut records, count);
            tracing::info!(
                removed,
                percent = self.evict_percent,
                "session store at capacity, evicted least-recent sessions"
            );
        }
        records.insert(
            session_id.to_string(),
            SessionRecord {
                session_id: session_id.to_string(),
                client_public_key: client_public_key.to_string(),
                last_modified: self.time_source.now(),
            },
        );
        true
    }

    /// Whether a session exists; touches its recency on a hit
    pub fn check_exists(&self, session_id: &str) -> bool {
        let mut records = self.lock();
        match records.get_mut(session_id.trim()) {
            Some(record) => {
                record.last_modified = self.time_source.now();
                true
            }
            None => false,
        }
    }

    /// Fetch a session snapshot; touches its recency on a hit
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let mut records = self.lock();
        records.get_mut(session_id.trim()).map(|record| {
            record.last_modified = self.time_source.now();
            record.clone()
        })
    }

    /// Remove the least-recently-touched `percent` of sessions.
    ///
    /// Returns the number of records removed. Ties in recency are broken by
    /// session id so the pass is reproducible.
    pub fn evict(&self, percent: u8) -> usize {
        let mut records = self.lock();
        let count = Self::eviction_count(records.len(), percent);
        Self::evict_locked(&mut records, count)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Background consistency sweep.
    ///
    /// A check that cannot pass reports what it found; it never answers
    /// "no error found" for a table it could not verify.
    pub fn verify_integrity(&self) -> Result<()> {
        let records = self.lock();
        if records.len() > self.max_sessions {
            return Err(ParleyError::Session(SessionError::Integrity {
                reason: format!(
                    "store holds {} sessions, limit is {}",
                    records.len(),
                    self.max_sessions
                ),
            }));
        }
        for (key, record) in records.iter() {
            if key.is_empty() || key != key.trim() {
                return Err(ParleyError::Session(SessionError::Integrity {
                    reason: format!("non-normalized session key {:?}", key),
                }));
            }
            if *key != record.session_id {
                return Err(ParleyError::Session(SessionError::Integrity {
                    reason: format!(
                        "key {:?} indexes record for {:?}",
                        key, record.session_id
                    ),
                }));
            }
        }
        Ok(())
    }

    fn eviction_count(len: usize, percent: u8) -> usize {
        len * (percent.min(100) as usize) / 100
    }

    fn evict_locked(records: &mut HashMap<String, SessionRecord>, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        let mut ordered: Vec<(Timestamp, String)> = records
            .values()
            .map(|r| (r.last_modified, r.session_id.clone()))
            .collect();
        ordered.sort();
        for (_, session_id) in ordered.into_iter().take(count) {
            records.remove(&session_id);
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        // A worker that panicked mid-operation left at worst a consistent
        // map (every method upholds its invariants before unlocking).
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl core::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionStore")
            .field("len", &self.len())
            .field("max_sessions", &self.max_sessions)
            .field("evict_percent", &self.evict_percent)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Hand-driven clock so recency ordering is deterministic
    #[derive(Default)]
    struct ManualTimeSource(AtomicU64);

    impl ManualTimeSource {
        fn tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl TimeSource for ManualTimeSource {
        fn now(&self) -> Timestamp {
            Timestamp::from_millis(self.0.load(Ordering::SeqCst))
        }
    }

    fn store_with_clock(max: usize, percent: u8) -> (SessionStore, Arc<ManualTimeSource>) {
        let clock = Arc::new(ManualTimeSource::default());
        let store = SessionStore::new(max, percent, Arc::clone(&clock) as Arc<dyn TimeSource>);
        (store, clock)
    }

    #[test]
    fn test_add_then_duplicate() {
        let (store, _) = store_with_clock(10, 10);
        assert!(store.add("s1", "PKc"));
        assert!(!store.add("s1", "PKc"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_normalizes_by_trimming() {
        let (store, _) = store_with_clock(10, 10);
        assert!(store.add("  s1  ", "PKc"));
        assert!(!store.add("s1", "PKc"));
        assert!(store.check_exists("s1"));
        assert!(store.check_exists(" s1 "));
    }

    #[test]
    fn test_empty_id_rejected() {
        let (store, _) = store_with_clock(10, 10);
        assert!(!store.add("   ", "PKc"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let (store, clock) = store_with_clock(10, 10);
        for i in 0..25 {
            clock.tick();
            assert!(store.add(&format!("s{i}"), "pk"));
            assert!(store.len() <= 10);
        }
    }

    #[test]
    fn test_small_store_stays_bounded_when_percentage_floors_to_zero() {
        // floor(2 * 10 / 100) = 0, yet the insert must still find room.
        let (store, clock) = store_with_clock(2, 10);
        for i in 0..6 {
            clock.tick();
            assert!(store.add(&format!("s{i}"), "pk"));
            assert!(store.len() <= 2);
            assert!(store.verify_integrity().is_ok());
        }
        // The newest ids survive.
        assert!(store.check_exists("s5"));
        assert!(!store.check_exists("s0"));
    }

    #[test]
    fn test_overflow_eviction_under_default_percent() {
        let (store, clock) = store_with_clock(5, 10);
        for i in 0..8 {
            clock.tick();
            assert!(store.add(&format!("s{i}"), "pk"));
        }
        assert_eq!(store.len(), 5);
        assert!(store.verify_integrity().is_ok());
    }

    #[test]
    fn test_eviction_removes_exact_count_of_oldest() {
        let (store, clock) = store_with_clock(100, 10);
        for i in 0..10 {
            clock.tick();
            store.add(&format!("s{i}"), "pk");
        }
        // floor(10 * 30 / 100) = 3 oldest: s0, s1, s2
        assert_eq!(store.evict(30), 3);
        assert_eq!(store.len(), 7);
        assert!(!store.check_exists("s0"));
        assert!(!store.check_exists("s1"));
        assert!(!store.check_exists("s2"));
        assert!(store.check_exists("s3"));
    }

    #[test]
    fn test_evict_percent_clamped_to_100() {
        let (store, clock) = store_with_clock(100, 10);
        for i in 0..5 {
            clock.tick();
            store.add(&format!("s{i}"), "pk");
        }
        assert_eq!(store.evict(200), 5);
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_zero_count_is_noop() {
        let (store, _) = store_with_clock(100, 10);
        store.add("s1", "pk");
        // floor(1 * 10 / 100) = 0
        assert_eq!(store.evict(10), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_touch_on_access_survives_eviction() {
        let (store, clock) = store_with_clock(100, 10);
        for i in 0..10 {
            clock.tick();
            store.add(&format!("s{i}"), "pk");
        }
        // s0 is the oldest until we touch it.
        clock.tick();
        assert!(store.check_exists("s0"));

        assert_eq!(store.evict(10), 1);
        assert!(store.check_exists("s0"));
        assert!(!store.check_exists("s1"));
    }

    #[test]
    fn test_get_returns_snapshot_and_touches() {
        let (store, clock) = store_with_clock(100, 10);
        clock.tick();
        store.add("s1", "PKc");
        clock.tick();

        let record = store.get("s1").expect("record exists");
        assert_eq!(record.client_public_key, "PKc");
        assert_eq!(record.last_modified.as_millis(), 2);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_eviction_tie_break_is_deterministic() {
        let (store, _) = store_with_clock(100, 10);
        // All records share last_modified = 0; ids decide the order.
        for id in ["c", "a", "b"] {
            store.add(id, "pk");
        }
        assert_eq!(store.evict(34), 1);
        assert!(!store.check_exists("a"));
        assert!(store.check_exists("b"));
        assert!(store.check_exists("c"));
    }

    #[test]
    fn test_integrity_check_passes_on_healthy_store() {
        let (store, _) = store_with_clock(10, 10);
        store.add("s1", "pk");
        assert!(store.verify_integrity().is_ok());
    }
}
