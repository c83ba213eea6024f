use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::io::IngestionError;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Insufficient history for item {item_id}: {buckets} bucket(s), at least 2 required")]
    InsufficientHistory { item_id: String, buckets: usize },

    #[error("Quantity total for item {item_id} is out of range")]
    QuantityOverflow { item_id: String },

    #[error("Ledger load failed: {0}")]
    Ingestion(#[from] IngestionError),
}

impl AnalyticsError {
    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AnalyticsError::UnknownItem(_) => "unknown_item",
            AnalyticsError::InvalidQuery(_) => "invalid_query",
            AnalyticsError::InsufficientHistory { .. } => "insufficient_history",
            AnalyticsError::QuantityOverflow { .. } => "quantity_overflow",
            AnalyticsError::Ingestion(_) => "ingestion_failed",
        }
    }
}

/// Validate a result limit coming from an untyped surface (query string, CLI).
pub fn validate_limit(limit: i64) -> Result<usize, AnalyticsError> {
    if limit <= 0 {
        return Err(AnalyticsError::InvalidQuery(format!(
            "limit must be a positive integer, got {}",
            limit
        )));
    }
    usize::try_from(limit)
        .map_err(|_| AnalyticsError::InvalidQuery(format!("limit {} is out of range", limit)))
}

pub(crate) fn overflow(item_id: &str) -> AnalyticsError {
    AnalyticsError::QuantityOverflow {
        item_id: item_id.to_string(),
    }
}

pub(crate) fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), AnalyticsError> {
    if start >= end {
        return Err(AnalyticsError::InvalidQuery(format!(
            "start ({}) must be before end ({})",
            start.to_rfc3339(),
            end.to_rfc3339()
        )));
    }
    Ok(())
}

pub(crate) fn validate_threshold(threshold: f64) -> Result<(), AnalyticsError> {
    if !(threshold.is_finite() && threshold > 0.0) {
        return Err(AnalyticsError::InvalidQuery(format!(
            "threshold must be a finite positive number, got {}",
            threshold
        )));
    }
    Ok(())
}
