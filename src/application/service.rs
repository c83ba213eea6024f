use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};

use crate::config::{AlertThresholds, EngineConfig, LedgerSource};
use crate::domain::{
    add_quantity, Granularity, Ledger, MovementType, Quantity, RollupBucket, StockSnapshot,
};
use crate::storage::{LedgerStore, ReloadReport};

use super::error::{overflow, validate_range, validate_threshold};
use super::{
    AggregationEngine, AlertDistribution, AlertLevel, AnalyticsError, AnomalyReport, CacheStats,
    FlaggedBucket, SeasonalityProfile, StockAlert, TopMover, TopSeller,
};

/// Read-only analytics over the store's current ledger.
/// This is the interface every client (CLI, HTTP) goes through.
///
/// Each query takes one snapshot from the store up front and answers entirely
/// from it, so a concurrent reload can never mix two ledgers in one answer.
#[derive(Debug)]
pub struct AnalyticsService {
    store: Arc<LedgerStore>,
    engine: AggregationEngine,
    alerts: AlertThresholds,
}

impl AnalyticsService {
    pub fn new(store: Arc<LedgerStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            engine: AggregationEngine::new(config.stock_cache_per_item, config.rollup_cache_entries),
            alerts: config.alerts,
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.engine.stats()
    }

    /// Reload the ledger. On failure the current ledger keeps serving queries.
    pub fn reload(&self, source: &LedgerSource) -> Result<ReloadReport, AnalyticsError> {
        let report = self.store.reload(source)?;
        self.engine.invalidate();
        Ok(report)
    }

    // ========================
    // Stock
    // ========================

    pub fn item_ids(&self) -> BTreeSet<String> {
        self.store.item_ids()
    }

    /// Balance as of the latest timestamp in the ledger.
    pub fn current_stock(&self, item_id: &str) -> Result<StockSnapshot, AnalyticsError> {
        let ledger = self.store.current();
        let as_of = latest_for_known_item(&ledger, item_id)?;
        self.engine.stock_at(&ledger, item_id, as_of)
    }

    pub fn stock_at(
        &self,
        item_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<StockSnapshot, AnalyticsError> {
        let ledger = self.store.current();
        self.engine.stock_at(&ledger, item_id, as_of)
    }

    /// Every item at the latest ledger timestamp, classified against the
    /// alert thresholds. Ordered by item id.
    pub fn stock_alerts(&self) -> Result<Vec<StockAlert>, AnalyticsError> {
        let ledger = self.store.current();
        let Some(as_of) = ledger.latest_timestamp() else {
            return Ok(Vec::new());
        };

        ledger
            .item_ids()
            .into_iter()
            .map(|item_id| {
                let snapshot = self.engine.stock_at(&ledger, &item_id, as_of)?;
                Ok::<_, AnalyticsError>(StockAlert {
                    level: self.classify(snapshot.balance),
                    balance: snapshot.balance,
                    item_id,
                })
            })
            .collect()
    }

    pub fn alert_distribution(&self) -> Result<AlertDistribution, AnalyticsError> {
        let mut distribution = AlertDistribution::default();
        for alert in self.stock_alerts()? {
            match alert.level {
                AlertLevel::Critical => distribution.critical += 1,
                AlertLevel::Low => distribution.low += 1,
                AlertLevel::Normal => distribution.normal += 1,
            }
        }
        Ok(distribution)
    }

    fn classify(&self, balance: Quantity) -> AlertLevel {
        if balance < self.alerts.critical_below {
            AlertLevel::Critical
        } else if balance < self.alerts.low_below {
            AlertLevel::Low
        } else {
            AlertLevel::Normal
        }
    }

    // ========================
    // Movement analytics
    // ========================

    pub fn trend(
        &self,
        item_id: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RollupBucket>, AnalyticsError> {
        let ledger = self.store.current();
        let buckets = self
            .engine
            .rollup(&ledger, item_id, granularity, start, end)?;
        Ok(buckets.to_vec())
    }

    /// Items ranked by absolute net change over `[start, end)`, ties broken by
    /// item id.
    pub fn top_movers(
        &self,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TopMover>, AnalyticsError> {
        if limit == 0 {
            return Err(AnalyticsError::InvalidQuery(
                "limit must be a positive integer".to_string(),
            ));
        }
        validate_range(start, end)?;

        let ledger = self.store.current();
        let mut movers = ledger
            .item_ids()
            .into_iter()
            .map(|item_id| {
                let buckets = self
                    .engine
                    .rollup(&ledger, &item_id, granularity, start, end)?;
                let net_change = buckets
                    .iter()
                    .try_fold(0, |total, b| add_quantity(total, b.net_change))
                    .map_err(|_| overflow(&item_id))?;
                Ok::<_, AnalyticsError>(TopMover {
                    item_id,
                    net_change,
                })
            })
            .collect::<Result<Vec<_>, AnalyticsError>>()?;

        movers.sort_by(|a, b| {
            b.net_change
                .unsigned_abs()
                .cmp(&a.net_change.unsigned_abs())
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        movers.truncate(limit);

        Ok(movers)
    }

    /// Buckets whose net change lies more than `threshold` standard deviations
    /// from the item's mean bucket net change.
    pub fn anomalies(
        &self,
        item_id: &str,
        granularity: Granularity,
        threshold: f64,
    ) -> Result<Vec<RollupBucket>, AnalyticsError> {
        let report = self.anomaly_report(item_id, granularity, threshold)?;
        Ok(report.anomalies.into_iter().map(|f| f.bucket).collect())
    }

    /// Anomaly detection with the statistics behind it.
    ///
    /// The history runs from the period holding the item's first movement to
    /// the period holding the ledger's latest timestamp, so quiet periods at
    /// the end count as zero-change buckets. The spread is the sample standard
    /// deviation; a flat history (spread 0) flags nothing.
    pub fn anomaly_report(
        &self,
        item_id: &str,
        granularity: Granularity,
        threshold: f64,
    ) -> Result<AnomalyReport, AnalyticsError> {
        validate_threshold(threshold)?;

        let ledger = self.store.current();
        let latest = latest_for_known_item(&ledger, item_id)?;
        let first = ledger.first_timestamp_for(item_id).unwrap_or(latest);

        let start = granularity.floor(first);
        let end = granularity.next_start(granularity.floor(latest));
        let buckets = self
            .engine
            .rollup(&ledger, item_id, granularity, start, end)?;

        if buckets.len() < 2 {
            return Err(AnalyticsError::InsufficientHistory {
                item_id: item_id.to_string(),
                buckets: buckets.len(),
            });
        }

        let values: Vec<f64> = buckets.iter().map(|b| b.net_change as f64).collect();
        let mean = mean(&values);
        let std_dev = stddev_sample(&values, mean);

        let anomalies = if std_dev <= f64::EPSILON {
            Vec::new()
        } else {
            buckets
                .iter()
                .filter_map(|bucket| {
                    let z = (bucket.net_change as f64 - mean) / std_dev;
                    (z.abs() > threshold).then(|| FlaggedBucket {
                        bucket: bucket.clone(),
                        z_score: z,
                    })
                })
                .collect()
        };

        tracing::debug!(
            item_id,
            granularity = %granularity,
            buckets = buckets.len(),
            flagged = anomalies.len(),
            "anomaly scan"
        );

        Ok(AnomalyReport {
            item_id: item_id.to_string(),
            granularity,
            threshold,
            buckets_examined: buckets.len(),
            mean_net_change: mean,
            std_dev,
            anomalies,
        })
    }

    // ========================
    // Sales
    // ========================

    /// Items ranked by total outbound volume. Items that never shipped are left out.
    pub fn top_sellers(&self, limit: usize) -> Result<Vec<TopSeller>, AnalyticsError> {
        if limit == 0 {
            return Err(AnalyticsError::InvalidQuery(
                "limit must be a positive integer".to_string(),
            ));
        }

        let ledger = self.store.current();
        let mut totals: BTreeMap<&str, Quantity> = BTreeMap::new();
        for record in ledger
            .records()
            .iter()
            .filter(|r| r.movement_type == MovementType::Outbound)
        {
            let total = totals.entry(record.item_id.as_str()).or_insert(0);
            *total = add_quantity(*total, record.outbound_units())
                .map_err(|_| overflow(&record.item_id))?;
        }

        let mut sellers: Vec<TopSeller> = totals
            .into_iter()
            .filter(|(_, units)| *units > 0)
            .map(|(item_id, units_sold)| TopSeller {
                item_id: item_id.to_string(),
                units_sold,
            })
            .collect();

        // BTreeMap order already sorts ties by item id; the sort is stable.
        sellers.sort_by(|a, b| b.units_sold.cmp(&a.units_sold));
        sellers.truncate(limit);

        Ok(sellers)
    }

    /// Monthly outbound profile of the `limit` best sellers.
    pub fn seasonality(&self, limit: usize) -> Result<Vec<SeasonalityProfile>, AnalyticsError> {
        let sellers = self.top_sellers(limit)?;
        let ledger = self.store.current();

        sellers
            .into_iter()
            .map(|seller| {
                let mut monthly_units = [0; 12];
                for record in ledger
                    .records_for(&seller.item_id)
                    .into_iter()
                    .filter(|r| r.movement_type == MovementType::Outbound)
                {
                    let month = &mut monthly_units[record.timestamp.month0() as usize];
                    *month = add_quantity(*month, record.outbound_units())
                        .map_err(|_| overflow(&seller.item_id))?;
                }
                Ok::<_, AnalyticsError>(SeasonalityProfile {
                    item_id: seller.item_id,
                    monthly_units,
                })
            })
            .collect()
    }
}

fn latest_for_known_item(ledger: &Ledger, item_id: &str) -> Result<DateTime<Utc>, AnalyticsError> {
    match ledger.latest_timestamp() {
        Some(latest) if ledger.contains_item(item_id) => Ok(latest),
        _ => Err(AnalyticsError::UnknownItem(item_id.to_string())),
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation (n - 1).
fn stddev_sample(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let variance = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_stddev() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&xs);
        assert!((m - 5.0).abs() < 1e-9);
        assert!((stddev_sample(&xs, m) - 2.138089935).abs() < 1e-6);
        assert_eq!(stddev_sample(&[1.0], 1.0), 0.0);
    }
}
