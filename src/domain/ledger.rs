use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Granularity, MovementRecord, Quantity};

/// The full, time-ordered history of movements for every item.
///
/// Records are ordered by timestamp, then by their position in the source, so
/// two loads of the same file always produce the same sequence. A ledger is
/// never mutated after construction; the store replaces it wholesale.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    version: u64,
    records: Vec<MovementRecord>,
    /// item id -> indices into `records`, in ledger order
    by_item: BTreeMap<String, Vec<usize>>,
}

impl Ledger {
    /// An empty ledger (version 0), what the store serves before the first load.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_records(mut records: Vec<MovementRecord>) -> Self {
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.sequence.cmp(&b.sequence))
        });

        let mut by_item: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, record) in records.iter().enumerate() {
            by_item.entry(record.item_id.clone()).or_default().push(idx);
        }

        Self {
            version: 0,
            records,
            by_item,
        }
    }

    /// Stamp the ledger with the version the store published it under.
    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn records(&self) -> &[MovementRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.by_item.len()
    }

    pub fn contains_item(&self, item_id: &str) -> bool {
        self.by_item.contains_key(item_id)
    }

    pub fn item_ids(&self) -> BTreeSet<String> {
        self.by_item.keys().cloned().collect()
    }

    /// All movements of one item in ledger order (empty for unknown items).
    pub fn records_for(&self, item_id: &str) -> Vec<&MovementRecord> {
        self.by_item
            .get(item_id)
            .map(|indices| indices.iter().map(|&idx| &self.records[idx]).collect())
            .unwrap_or_default()
    }

    /// Movements of one item with `start <= timestamp < end`.
    pub fn records_between(
        &self,
        item_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<&MovementRecord> {
        self.records_for(item_id)
            .into_iter()
            .filter(|r| r.timestamp >= start && r.timestamp < end)
            .collect()
    }

    /// Timestamp of the most recent movement across all items.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.last().map(|r| r.timestamp)
    }

    pub fn first_timestamp_for(&self, item_id: &str) -> Option<DateTime<Utc>> {
        self.by_item
            .get(item_id)
            .and_then(|indices| indices.first())
            .map(|&idx| self.records[idx].timestamp)
    }
}

/// Point-in-time balance of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub item_id: String,
    pub as_of: DateTime<Utc>,
    pub balance: Quantity,
}

/// Movement totals of one item over `[period_start, period_end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupBucket {
    pub item_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub net_change: Quantity,
    /// Sum of positive deltas
    pub inbound_total: Quantity,
    /// Sum of negative deltas, as a positive magnitude
    pub outbound_total: Quantity,
}

/// A balance or total left the `Quantity` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantityOverflow;

impl std::fmt::Display for QuantityOverflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "quantity total out of range")
    }
}

impl std::error::Error for QuantityOverflow {}

/// Checked `a + b` for quantities.
pub fn add_quantity(a: Quantity, b: Quantity) -> Result<Quantity, QuantityOverflow> {
    a.checked_add(b).ok_or(QuantityOverflow)
}

/// Balance = sum of every delta with `timestamp <= as_of`.
pub fn compute_stock<'a>(
    records: impl IntoIterator<Item = &'a MovementRecord>,
    as_of: DateTime<Utc>,
) -> Result<Quantity, QuantityOverflow> {
    records
        .into_iter()
        .filter(|r| r.timestamp <= as_of)
        .try_fold(0, |balance, r| add_quantity(balance, r.quantity_delta))
}

/// Roll an item's movements up into calendar buckets covering `[start, end)`.
///
/// `records` must be in ledger order. Every period of the range yields a bucket,
/// including periods without movements.
pub fn compute_rollup(
    item_id: &str,
    records: &[&MovementRecord],
    granularity: Granularity,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<RollupBucket>, QuantityOverflow> {
    let mut cursor = records.partition_point(|r| r.timestamp < start);

    granularity
        .partition(start, end)
        .into_iter()
        .map(|(period_start, period_end)| {
            let mut bucket = RollupBucket {
                item_id: item_id.to_string(),
                period_start,
                period_end,
                net_change: 0,
                inbound_total: 0,
                outbound_total: 0,
            };

            while let Some(record) = records.get(cursor) {
                if record.timestamp >= period_end {
                    break;
                }
                bucket.inbound_total = add_quantity(bucket.inbound_total, record.inbound_units())?;
                bucket.outbound_total =
                    add_quantity(bucket.outbound_total, record.outbound_units())?;
                bucket.net_change = add_quantity(bucket.net_change, record.quantity_delta)?;
                cursor += 1;
            }

            Ok::<_, QuantityOverflow>(bucket)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MovementType;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn movement(item: &str, at: &str, delta: Quantity, seq: u64) -> MovementRecord {
        let kind = if delta > 0 {
            MovementType::Inbound
        } else {
            MovementType::Outbound
        };
        MovementRecord::new(item, ts(at), delta, kind)
            .unwrap()
            .with_sequence(seq)
    }

    #[test]
    fn test_ledger_orders_by_time_then_sequence() {
        let ledger = Ledger::from_records(vec![
            movement("A", "2024-01-05T00:00:00Z", -3, 0),
            movement("B", "2024-01-01T00:00:00Z", 4, 1),
            movement("A", "2024-01-01T00:00:00Z", 10, 2),
        ]);

        let order: Vec<u64> = ledger.records().iter().map(|r| r.sequence).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(ledger.latest_timestamp(), Some(ts("2024-01-05T00:00:00Z")));
        assert_eq!(ledger.item_count(), 2);
    }

    #[test]
    fn test_records_for_unknown_item() {
        let ledger = Ledger::from_records(vec![movement("A", "2024-01-01T00:00:00Z", 1, 0)]);
        assert!(ledger.records_for("Z").is_empty());
        assert!(!ledger.contains_item("Z"));
        assert!(ledger.contains_item("A"));
    }

    #[test]
    fn test_compute_stock() {
        let ledger = Ledger::from_records(vec![
            movement("A", "2024-01-01T00:00:00Z", 10, 0),
            movement("A", "2024-01-05T00:00:00Z", -3, 1),
        ]);
        let records = ledger.records_for("A");

        assert_eq!(compute_stock(records.iter().copied(), ts("2024-01-10T00:00:00Z")).unwrap(), 7);
        assert_eq!(compute_stock(records.iter().copied(), ts("2024-01-05T00:00:00Z")).unwrap(), 7);
        assert_eq!(compute_stock(records.iter().copied(), ts("2024-01-04T23:59:59Z")).unwrap(), 10);
        assert_eq!(compute_stock(records.iter().copied(), ts("2023-12-31T00:00:00Z")).unwrap(), 0);
    }

    #[test]
    fn test_compute_rollup_fills_gaps() {
        let ledger = Ledger::from_records(vec![
            movement("A", "2024-01-01T09:00:00Z", 10, 0),
            movement("A", "2024-01-01T17:00:00Z", -4, 1),
            movement("A", "2024-01-03T12:00:00Z", -1, 2),
        ]);
        let records = ledger.records_for("A");

        let buckets = compute_rollup(
            "A",
            &records,
            Granularity::Day,
            ts("2024-01-01T00:00:00Z"),
            ts("2024-01-04T00:00:00Z"),
        )
        .unwrap();

        assert_eq!(buckets.len(), 3);
        assert_eq!(
            (buckets[0].net_change, buckets[0].inbound_total, buckets[0].outbound_total),
            (6, 10, 4)
        );
        assert_eq!((buckets[1].net_change, buckets[1].inbound_total), (0, 0));
        assert_eq!(
            (buckets[2].net_change, buckets[2].outbound_total),
            (-1, 1)
        );
    }

    #[test]
    fn test_compute_rollup_ignores_records_outside_range() {
        let ledger = Ledger::from_records(vec![
            movement("A", "2023-12-31T23:00:00Z", 100, 0),
            movement("A", "2024-01-02T00:00:00Z", 5, 1),
            movement("A", "2024-01-03T00:00:00Z", 7, 2),
        ]);
        let records = ledger.records_for("A");

        let buckets = compute_rollup(
            "A",
            &records,
            Granularity::Week,
            ts("2024-01-01T00:00:00Z"),
            ts("2024-01-03T00:00:00Z"),
        )
        .unwrap();

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].net_change, 5);
    }

    #[test]
    fn test_totals_overflow_is_an_error() {
        // Built directly: the loader never produces deltas this large.
        let huge = |delta: Quantity, seq: u64| MovementRecord {
            item_id: "A".to_string(),
            timestamp: ts("2024-01-01T00:00:00Z"),
            quantity_delta: delta,
            movement_type: MovementType::Adjustment,
            warehouse_id: None,
            unit_cost: None,
            sequence: seq,
        };
        let ledger = Ledger::from_records(vec![huge(i64::MAX, 0), huge(1, 1)]);
        let records = ledger.records_for("A");

        assert_eq!(
            compute_stock(records.iter().copied(), ts("2024-01-02T00:00:00Z")),
            Err(QuantityOverflow)
        );
        assert_eq!(
            compute_rollup(
                "A",
                &records,
                Granularity::Day,
                ts("2024-01-01T00:00:00Z"),
                ts("2024-01-02T00:00:00Z"),
            ),
            Err(QuantityOverflow)
        );

        let shipped = Ledger::from_records(vec![huge(i64::MIN, 0)]);
        assert_eq!(shipped.records()[0].outbound_units(), i64::MAX);
    }
}
