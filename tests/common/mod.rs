// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use stockpulse::application::AnalyticsService;
use stockpulse::config::{EngineConfig, LedgerSource, LoaderOptions};
use stockpulse::storage::LedgerStore;
use tempfile::NamedTempFile;

pub const HEADER: &str = "item_id,timestamp,quantity_delta,movement_type";

/// Build a CSV ledger from data rows, prefixed with the standard header
pub fn ledger_csv(rows: &[&str]) -> String {
    let mut csv = String::from(HEADER);
    for row in rows {
        csv.push('\n');
        csv.push_str(row);
    }
    csv.push('\n');
    csv
}

/// Write CSV contents to a temporary file, returned so it lives as long as the test
pub fn ledger_file(contents: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Service with default configuration and `rows` already loaded
pub fn test_service(rows: &[&str]) -> Result<AnalyticsService> {
    let store = Arc::new(LedgerStore::new(LoaderOptions::default()));
    let service = AnalyticsService::new(store, &EngineConfig::default());
    service.reload(&LedgerSource::inline(ledger_csv(rows)))?;
    Ok(service)
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Ten consecutive days of +1 for `item_id` with a spike of +50 on the last day
pub fn spike_rows(item_id: &str) -> Vec<String> {
    (1..=10)
        .map(|day| {
            let qty = if day == 10 { 50 } else { 1 };
            format!("{},2024-03-{:02},{},inbound", item_id, day, qty)
        })
        .collect()
}
