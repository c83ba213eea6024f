use serde::{Deserialize, Serialize};

use crate::domain::{Granularity, Quantity, RollupBucket};

pub const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Net movement of one item over a query range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopMover {
    pub item_id: String,
    pub net_change: Quantity,
}

/// Total outbound volume of one item across the whole ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopSeller {
    pub item_id: String,
    pub units_sold: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Critical,
    Low,
    Normal,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Critical => "critical",
            AlertLevel::Low => "low",
            AlertLevel::Normal => "normal",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub item_id: String,
    pub balance: Quantity,
    pub level: AlertLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertDistribution {
    pub critical: usize,
    pub low: usize,
    pub normal: usize,
}

/// Outbound units per calendar month, all years folded together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalityProfile {
    pub item_id: String,
    /// Index 0 is January
    pub monthly_units: [Quantity; 12],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedBucket {
    #[serde(flatten)]
    pub bucket: RollupBucket,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub item_id: String,
    pub granularity: Granularity,
    pub threshold: f64,
    pub buckets_examined: usize,
    pub mean_net_change: f64,
    pub std_dev: f64,
    pub anomalies: Vec<FlaggedBucket>,
}
