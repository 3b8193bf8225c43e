use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::flag::FlagSnapshot;

/// Result of looking a flag up in the [EvaluationCache].
#[derive(Clone, Debug, PartialEq)]
pub enum CacheLookup {
    Fresh(Arc<FlagSnapshot>),
    /// The entry outlived the cache TTL. It should be refreshed, but may still be served if the
    /// store cannot be reached.
    Expired(Arc<FlagSnapshot>),
    Miss,
}

/// Proof of when a store fetch started. A fetched snapshot is only cached if no invalidation
/// touching its key happened after the ticket was taken.
///
/// Every ticket must be handed back, either to [EvaluationCache::put_fetched] or to
/// [EvaluationCache::release].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct FetchTicket(u64);

struct CacheEntry {
    snapshot: Arc<FlagSnapshot>,
    stored_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    generation: u64,
    // Only holds invalidations newer than the oldest outstanding ticket.
    invalidated_at: HashMap<String, u64>,
    cleared_at: u64,
    // Outstanding tickets, counted by generation.
    outstanding: BTreeMap<u64, usize>,
}

impl CacheState {
    fn release(&mut self, ticket: FetchTicket) {
        if let Some(count) = self.outstanding.get_mut(&ticket.0) {
            *count -= 1;
            if *count == 0 {
                self.outstanding.remove(&ticket.0);
            }
        }
        match self.outstanding.keys().next().copied() {
            Some(oldest) => self.invalidated_at.retain(|_, generation| *generation > oldest),
            None => self.invalidated_at.clear(),
        }
    }
}

/// EvaluationCache is a process-local cache of flag snapshots keyed solely by flag name.
///
/// Writes to the underlying store do not reach the cache. Entries live until they are explicitly
/// invalidated, the cache is cleared, or (when a TTL is configured) they expire and are refreshed
/// on the next read.
pub struct EvaluationCache {
    state: RwLock<CacheState>,
    ttl: Option<Duration>,
}

impl EvaluationCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl,
        }
    }

    /// Returns the cached snapshot for `name` regardless of its age.
    pub fn get(&self, name: &str) -> Option<Arc<FlagSnapshot>> {
        self.state
            .read()
            .entries
            .get(name)
            .map(|entry| entry.snapshot.clone())
    }

    pub fn lookup(&self, name: &str, now: DateTime<Utc>) -> CacheLookup {
        let state = self.state.read();
        match state.entries.get(name) {
            Some(entry) if self.is_expired(entry, now) => {
                CacheLookup::Expired(entry.snapshot.clone())
            }
            Some(entry) => CacheLookup::Fresh(entry.snapshot.clone()),
            None => CacheLookup::Miss,
        }
    }

    /// Caches `snapshot` under `name` unconditionally, as stored at `now`.
    pub fn put(&self, name: &str, snapshot: FlagSnapshot, now: DateTime<Utc>) {
        self.state.write().entries.insert(
            name.to_string(),
            CacheEntry {
                snapshot: Arc::new(snapshot),
                stored_at: now,
            },
        );
    }

    /// Takes a ticket to be presented to [EvaluationCache::put_fetched] once a store fetch
    /// started now completes.
    pub fn ticket(&self) -> FetchTicket {
        let mut state = self.state.write();
        let generation = state.generation;
        *state.outstanding.entry(generation).or_insert(0) += 1;
        FetchTicket(generation)
    }

    /// Hands back a ticket whose fetch produced nothing to cache.
    pub fn release(&self, ticket: FetchTicket) {
        self.state.write().release(ticket);
    }

    /// Caches a snapshot fetched under `ticket`. Returns false, leaving the cache untouched, if
    /// `name` was invalidated or the cache cleared after the ticket was taken.
    pub fn put_fetched(
        &self,
        ticket: FetchTicket,
        name: &str,
        snapshot: Arc<FlagSnapshot>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut state = self.state.write();
        let invalidated_at = state.invalidated_at.get(name).copied().unwrap_or(0);
        let accepted = ticket.0 >= state.cleared_at && ticket.0 >= invalidated_at;
        if accepted {
            state.entries.insert(
                name.to_string(),
                CacheEntry {
                    snapshot,
                    stored_at: now,
                },
            );
        }
        state.release(ticket);
        accepted
    }

    /// Drops the entry for `name`. Returns true if there was one.
    pub fn invalidate(&self, name: &str) -> bool {
        let mut state = self.state.write();
        state.generation += 1;
        if !state.outstanding.is_empty() {
            let generation = state.generation;
            state.invalidated_at.insert(name.to_string(), generation);
        }
        state.entries.remove(name).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.generation += 1;
        state.cleared_at = state.generation;
        state.invalidated_at.clear();
        state.entries.clear();
    }

    // Removal of an entry the store no longer knows; not an invalidation, so in-flight fetches
    // are unaffected.
    pub(crate) fn evict(&self, name: &str) {
        self.state.write().entries.remove(name);
    }

    pub fn names(&self) -> Vec<String> {
        self.state.read().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn tracked_invalidations(&self) -> usize {
        self.state.read().invalidated_at.len()
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match (self.ttl, (now - entry.stored_at).to_std()) {
            (Some(ttl), Ok(age)) => age > ttl,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use spectral::prelude::*;

    fn snapshot(name: &str) -> Arc<FlagSnapshot> {
        Arc::new(FlagSnapshot::new(name))
    }

    #[test]
    fn put_get_invalidate() {
        let cache = EvaluationCache::new(None);
        assert_that!(cache.get("a")).is_none();

        cache.put("a", FlagSnapshot::new("a"), Utc::now());
        assert_that!(cache.get("a").map(|s| s.name.clone())).contains_value("a".to_string());
        assert_that!(cache.len()).is_equal_to(1);

        assert_that!(cache.invalidate("a")).is_true();
        assert_that!(cache.get("a")).is_none();
        assert_that!(cache.invalidate("a")).is_false();
    }

    #[test]
    fn clear_drops_everything() {
        let cache = EvaluationCache::new(None);
        cache.put("a", FlagSnapshot::new("a"), Utc::now());
        cache.put("b", FlagSnapshot::new("b"), Utc::now());

        cache.clear();
        assert_that!(cache.is_empty()).is_true();
        assert_that!(cache.names()).is_empty();
    }

    #[test]
    fn entries_without_ttl_never_expire() {
        let cache = EvaluationCache::new(None);
        let stored = Utc::now();
        let ticket = cache.ticket();
        cache.put_fetched(ticket, "a", snapshot("a"), stored);

        let much_later = stored + chrono::Duration::days(365);
        assert_that!(cache.lookup("a", much_later)).is_equal_to(CacheLookup::Fresh(snapshot("a")));
    }

    #[test]
    fn put_ages_from_the_given_time() {
        let cache = EvaluationCache::new(Some(Duration::from_secs(60)));
        let stored = Utc::now() - chrono::Duration::days(30);
        cache.put("a", FlagSnapshot::new("a"), stored);

        assert_that!(cache.lookup("a", stored + chrono::Duration::seconds(59)))
            .is_equal_to(CacheLookup::Fresh(snapshot("a")));
        assert_that!(cache.lookup("a", stored + chrono::Duration::seconds(61)))
            .is_equal_to(CacheLookup::Expired(snapshot("a")));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = EvaluationCache::new(Some(Duration::from_secs(60)));
        let stored = Utc::now();
        cache.put_fetched(cache.ticket(), "a", snapshot("a"), stored);

        assert_that!(cache.lookup("a", stored + chrono::Duration::seconds(60)))
            .is_equal_to(CacheLookup::Fresh(snapshot("a")));
        assert_that!(cache.lookup("a", stored + chrono::Duration::seconds(61)))
            .is_equal_to(CacheLookup::Expired(snapshot("a")));
        assert_that!(cache.lookup("b", stored)).is_equal_to(CacheLookup::Miss);

        // expired entries are still readable directly
        assert_that!(cache.get("a")).is_some();
    }

    #[test]
    fn invalidation_wins_over_in_flight_fetch() {
        let cache = EvaluationCache::new(None);
        let ticket = cache.ticket();

        cache.invalidate("a");

        assert_that!(cache.put_fetched(ticket, "a", snapshot("a"), Utc::now())).is_false();
        assert_that!(cache.get("a")).is_none();

        let fresh_ticket = cache.ticket();
        assert_that!(cache.put_fetched(fresh_ticket, "a", snapshot("a"), Utc::now())).is_true();
        assert_that!(cache.get("a")).is_some();
    }

    #[test]
    fn invalidation_of_another_key_does_not_block_fetch() {
        let cache = EvaluationCache::new(None);
        let ticket = cache.ticket();

        cache.invalidate("b");

        assert_that!(cache.put_fetched(ticket, "a", snapshot("a"), Utc::now())).is_true();
    }

    #[test]
    fn clear_wins_over_in_flight_fetch() {
        let cache = EvaluationCache::new(None);
        let ticket = cache.ticket();

        cache.clear();

        assert_that!(cache.put_fetched(ticket, "a", snapshot("a"), Utc::now())).is_false();
        assert_that!(cache.put_fetched(cache.ticket(), "a", snapshot("a"), Utc::now())).is_true();
    }

    #[test]
    fn invalidations_without_fetches_in_flight_are_not_tracked() {
        let cache = EvaluationCache::new(None);
        for i in 0..1000 {
            cache.invalidate(&format!("flag-{}", i));
        }
        assert_that!(cache.tracked_invalidations()).is_equal_to(0);

        let ticket = cache.ticket();
        assert_that!(cache.put_fetched(ticket, "flag-1", snapshot("flag-1"), Utc::now())).is_true();
    }

    #[test]
    fn invalidations_are_forgotten_once_fetches_complete() {
        let cache = EvaluationCache::new(None);
        let first = cache.ticket();
        cache.invalidate("a");
        let second = cache.ticket();
        cache.invalidate("b");
        assert_that!(cache.tracked_invalidations()).is_equal_to(2);

        // "a" can no longer reject anything outstanding
        cache.release(first);
        assert_that!(cache.tracked_invalidations()).is_equal_to(1);

        assert_that!(cache.put_fetched(second, "b", snapshot("b"), Utc::now())).is_false();
        assert_that!(cache.tracked_invalidations()).is_equal_to(0);
        assert_that!(cache.put_fetched(cache.ticket(), "b", snapshot("b"), Utc::now())).is_true();
    }

    #[test]
    fn evict_does_not_block_fetch() {
        let cache = EvaluationCache::new(None);
        cache.put("a", FlagSnapshot::new("a"), Utc::now());
        let ticket = cache.ticket();

        cache.evict("a");

        assert_that!(cache.get("a")).is_none();
        assert_that!(cache.put_fetched(ticket, "a", snapshot("a"), Utc::now())).is_true();
    }

    #[test]
    fn concurrent_access() {
        let cache = Arc::new(EvaluationCache::new(None));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        let name = format!("flag-{}", (i + j) % 10);
                        let ticket = cache.ticket();
                        cache.put_fetched(ticket, &name, snapshot(&name), Utc::now());
                        let _ = cache.get(&name);
                        if j % 7 == 0 {
                            cache.invalidate(&name);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_that!(cache.len()).is_less_than_or_equal_to(10);
    }
}
