use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::domain::{
    compute_rollup, compute_stock, Granularity, Ledger, Quantity, RollupBucket, StockSnapshot,
};

use super::error::{overflow, validate_range};
use super::AnalyticsError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RollupKey {
    item_id: String,
    granularity: Granularity,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Memoised results, all computed against the ledger `version`.
#[derive(Debug)]
struct Cache {
    version: u64,
    /// Least recently used rollup queries are evicted first
    rollups: LruCache<RollupKey, Arc<Vec<RollupBucket>>>,
    /// Most recent `stock_at` results per item, oldest first
    stock: HashMap<String, VecDeque<(DateTime<Utc>, Quantity)>>,
}

impl Cache {
    fn new(rollup_capacity: usize) -> Self {
        Self {
            version: 0,
            rollups: LruCache::new(NonZeroUsize::new(rollup_capacity).unwrap_or(NonZeroUsize::MIN)),
            stock: HashMap::new(),
        }
    }

    fn reset(&mut self, version: u64) {
        self.version = version;
        self.rollups.clear();
        self.stock.clear();
    }

    fn entries(&self) -> usize {
        self.rollups.len() + self.stock.values().map(VecDeque::len).sum::<usize>()
    }
}

/// Cache counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub version: u64,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Derives stock snapshots and rollups from a ledger snapshot and memoises them.
///
/// The engine never owns a ledger; every call receives the snapshot it should
/// read. Cache entries are tagged with the version of the ledger they were
/// computed from:
/// - a lookup for a different version misses,
/// - an insert for a newer version clears the whole cache first,
/// - an insert computed from an older snapshot is discarded.
///
/// Values are computed outside the lock; only the final insert takes the write
/// lock. Two threads racing on the same key both compute the same value, and
/// whichever inserts last wins.
#[derive(Debug)]
pub struct AggregationEngine {
    cache: RwLock<Cache>,
    stock_capacity: usize,
    rollup_capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AggregationEngine {
    /// `stock_capacity` bounds the `stock_at` memo per item, `rollup_capacity`
    /// the rollup memo overall. Zero disables either memo.
    pub fn new(stock_capacity: usize, rollup_capacity: usize) -> Self {
        Self {
            cache: RwLock::new(Cache::new(rollup_capacity)),
            stock_capacity,
            rollup_capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Balance of `item_id` including every movement at or before `as_of`.
    ///
    /// Fails with `UnknownItem` if the item never appears in the ledger; a known
    /// item with no movements before `as_of` has a balance of zero.
    pub fn stock_at(
        &self,
        ledger: &Ledger,
        item_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<StockSnapshot, AnalyticsError> {
        ensure_known(ledger, item_id)?;

        let cached = {
            let cache = self.read_cache();
            (cache.version == ledger.version())
                .then(|| cache.stock.get(item_id))
                .flatten()
                .and_then(|entries| entries.iter().find(|(ts, _)| *ts == as_of))
                .map(|&(_, balance)| balance)
        };

        let balance = match cached {
            Some(balance) => {
                self.record_hit();
                balance
            }
            None => {
                self.record_miss();
                let balance = compute_stock(ledger.records_for(item_id), as_of)
                    .map_err(|_| overflow(item_id))?;
                if self.stock_capacity > 0 {
                    let capacity = self.stock_capacity;
                    self.insert(ledger.version(), |cache| {
                        let entries = cache.stock.entry(item_id.to_string()).or_default();
                        entries.retain(|(ts, _)| *ts != as_of);
                        entries.push_back((as_of, balance));
                        while entries.len() > capacity {
                            entries.pop_front();
                        }
                    });
                }
                balance
            }
        };

        Ok(StockSnapshot {
            item_id: item_id.to_string(),
            as_of,
            balance,
        })
    }

    /// Calendar buckets of `granularity` covering `[start, end)` for one item.
    /// Periods without movements are included with zero totals.
    pub fn rollup(
        &self,
        ledger: &Ledger,
        item_id: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Arc<Vec<RollupBucket>>, AnalyticsError> {
        ensure_known(ledger, item_id)?;
        validate_range(start, end)?;

        let key = RollupKey {
            item_id: item_id.to_string(),
            granularity,
            start,
            end,
        };

        // `get` refreshes recency, so the lookup takes the write lock.
        let cached = {
            let mut cache = self.write_cache();
            if cache.version == ledger.version() {
                cache.rollups.get(&key).cloned()
            } else {
                None
            }
        };

        if let Some(buckets) = cached {
            self.record_hit();
            return Ok(buckets);
        }

        self.record_miss();
        let records = ledger.records_for(item_id);
        let buckets = Arc::new(
            compute_rollup(item_id, &records, granularity, start, end)
                .map_err(|_| overflow(item_id))?,
        );

        if self.rollup_capacity > 0 {
            let value = Arc::clone(&buckets);
            self.insert(ledger.version(), move |cache| {
                cache.rollups.put(key, value);
            });
        }

        Ok(buckets)
    }

    /// Drop every cached result.
    pub fn invalidate(&self) {
        let mut cache = self.write_cache();
        let version = cache.version;
        cache.reset(version);
        tracing::debug!(version, "aggregation cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.read_cache();
        CacheStats {
            version: cache.version,
            entries: cache.entries(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, Cache> {
        // Entries are whole values inserted in one step; a panic elsewhere
        // cannot leave one half-written.
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, Cache> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, version: u64, apply: impl FnOnce(&mut Cache)) {
        let mut cache = self.write_cache();
        if version < cache.version {
            return;
        }
        if version > cache.version {
            tracing::debug!(
                from = cache.version,
                to = version,
                "ledger version changed; invalidating aggregation cache"
            );
            cache.reset(version);
        }
        apply(&mut *cache);
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new(64, 256)
    }
}

fn ensure_known(ledger: &Ledger, item_id: &str) -> Result<(), AnalyticsError> {
    if ledger.contains_item(item_id) {
        Ok(())
    } else {
        Err(AnalyticsError::UnknownItem(item_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MovementRecord, MovementType};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn ledger(version: u64, deltas: &[(&str, &str, i64)]) -> Ledger {
        let records = deltas
            .iter()
            .enumerate()
            .map(|(seq, (item, at, delta))| {
                MovementRecord::new(*item, ts(at), *delta, MovementType::Adjustment)
                    .unwrap()
                    .with_sequence(seq as u64)
            })
            .collect();
        Ledger::from_records(records).with_version(version)
    }

    #[test]
    fn test_stock_at_is_memoised() {
        let engine = AggregationEngine::new(4, 16);
        let l = ledger(1, &[("A", "2024-01-01T00:00:00Z", 10), ("A", "2024-01-05T00:00:00Z", -3)]);
        let as_of = ts("2024-01-10T00:00:00Z");

        assert_eq!(engine.stock_at(&l, "A", as_of).unwrap().balance, 7);
        assert_eq!(engine.stock_at(&l, "A", as_of).unwrap().balance, 7);

        let stats = engine.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_unknown_item_vs_zero_balance() {
        let engine = AggregationEngine::default();
        let l = ledger(1, &[("A", "2024-01-01T00:00:00Z", 10)]);

        let before = engine.stock_at(&l, "A", ts("2023-12-31T00:00:00Z")).unwrap();
        assert_eq!(before.balance, 0);

        assert!(matches!(
            engine.stock_at(&l, "B", ts("2024-01-10T00:00:00Z")),
            Err(AnalyticsError::UnknownItem(item)) if item == "B"
        ));
    }

    #[test]
    fn test_stock_cache_is_bounded_per_item() {
        let engine = AggregationEngine::new(2, 16);
        let l = ledger(1, &[("A", "2024-01-01T00:00:00Z", 1)]);

        for day in ["2024-01-02", "2024-01-03", "2024-01-04"] {
            let as_of = ts(&format!("{day}T00:00:00Z"));
            engine.stock_at(&l, "A", as_of).unwrap();
        }

        assert_eq!(engine.stats().entries, 2);
        // The oldest entry was evicted, so asking again is a miss.
        engine.stock_at(&l, "A", ts("2024-01-02T00:00:00Z")).unwrap();
        assert_eq!(engine.stats().misses, 4);
    }

    #[test]
    fn test_new_version_invalidates_cache() {
        let engine = AggregationEngine::default();
        let old = ledger(1, &[("A", "2024-01-01T00:00:00Z", 10)]);
        let new = ledger(2, &[("A", "2024-01-01T00:00:00Z", 25)]);
        let as_of = ts("2024-02-01T00:00:00Z");

        assert_eq!(engine.stock_at(&old, "A", as_of).unwrap().balance, 10);
        assert_eq!(engine.stock_at(&new, "A", as_of).unwrap().balance, 25);
        assert_eq!(engine.stats().version, 2);

        // A straggler still holding the old snapshot computes its own answer
        // without polluting the cache.
        assert_eq!(engine.stock_at(&old, "A", as_of).unwrap().balance, 10);
        assert_eq!(engine.stock_at(&new, "A", as_of).unwrap().balance, 25);
        assert_eq!(engine.stats().hits, 1);
    }

    #[test]
    fn test_rollup_is_memoised_and_validated() {
        let engine = AggregationEngine::default();
        let l = ledger(
            3,
            &[
                ("A", "2024-01-01T10:00:00Z", 10),
                ("A", "2024-01-09T10:00:00Z", -4),
            ],
        );
        let start = ts("2024-01-01T00:00:00Z");
        let end = ts("2024-01-15T00:00:00Z");

        let first = engine.rollup(&l, "A", Granularity::Week, start, end).unwrap();
        let second = engine.rollup(&l, "A", Granularity::Week, start, end).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].net_change, 10);
        assert_eq!(first[1].net_change, -4);

        assert!(matches!(
            engine.rollup(&l, "A", Granularity::Week, end, start),
            Err(AnalyticsError::InvalidQuery(_))
        ));
        assert!(matches!(
            engine.rollup(&l, "Z", Granularity::Week, start, end),
            Err(AnalyticsError::UnknownItem(_))
        ));
    }

    #[test]
    fn test_invalidate_clears_entries() {
        let engine = AggregationEngine::default();
        let l = ledger(1, &[("A", "2024-01-01T00:00:00Z", 1)]);
        engine.stock_at(&l, "A", ts("2024-01-02T00:00:00Z")).unwrap();
        assert_eq!(engine.stats().entries, 1);

        engine.invalidate();
        assert_eq!(engine.stats().entries, 0);
    }

    #[test]
    fn test_rollup_cache_evicts_least_recently_used() {
        let engine = AggregationEngine::new(0, 2);
        let l = ledger(1, &[("A", "2024-01-01T00:00:00Z", 1)]);
        let start = ts("2024-01-01T00:00:00Z");
        let ends = [
            ts("2024-01-02T00:00:00Z"),
            ts("2024-01-03T00:00:00Z"),
            ts("2024-01-04T00:00:00Z"),
        ];

        engine.rollup(&l, "A", Granularity::Day, start, ends[0]).unwrap();
        engine.rollup(&l, "A", Granularity::Day, start, ends[1]).unwrap();
        // Touch the first range so the second becomes the eviction candidate
        engine.rollup(&l, "A", Granularity::Day, start, ends[0]).unwrap();
        engine.rollup(&l, "A", Granularity::Day, start, ends[2]).unwrap();

        assert_eq!(engine.stats().entries, 2);
        assert_eq!((engine.stats().hits, engine.stats().misses), (1, 3));

        engine.rollup(&l, "A", Granularity::Day, start, ends[0]).unwrap();
        engine.rollup(&l, "A", Granularity::Day, start, ends[1]).unwrap();
        assert_eq!((engine.stats().hits, engine.stats().misses), (2, 4));
    }

    #[test]
    fn test_zero_capacity_disables_memo() {
        let engine = AggregationEngine::new(0, 0);
        let l = ledger(1, &[("A", "2024-01-01T00:00:00Z", 1)]);
        let as_of = ts("2024-01-02T00:00:00Z");

        engine.stock_at(&l, "A", as_of).unwrap();
        engine.rollup(&l, "A", Granularity::Day, ts("2024-01-01T00:00:00Z"), as_of).unwrap();

        assert_eq!(engine.stats().entries, 0);
    }

    #[test]
    fn test_overflowing_totals_are_reported() {
        let engine = AggregationEngine::default();
        let huge = |delta: i64, seq: u64| MovementRecord {
            item_id: "A".to_string(),
            timestamp: ts("2024-01-01T00:00:00Z"),
            quantity_delta: delta,
            movement_type: MovementType::Adjustment,
            warehouse_id: None,
            unit_cost: None,
            sequence: seq,
        };
        let l = Ledger::from_records(vec![huge(i64::MAX, 0), huge(1, 1)]).with_version(1);

        assert!(matches!(
            engine.stock_at(&l, "A", ts("2024-01-02T00:00:00Z")),
            Err(AnalyticsError::QuantityOverflow { item_id }) if item_id == "A"
        ));
        assert!(matches!(
            engine.rollup(
                &l,
                "A",
                Granularity::Day,
                ts("2024-01-01T00:00:00Z"),
                ts("2024-01-02T00:00:00Z"),
            ),
            Err(AnalyticsError::QuantityOverflow { .. })
        ));
    }
}
