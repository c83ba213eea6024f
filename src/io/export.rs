use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::{AnalyticsService, MONTH_NAMES};
use crate::domain::Granularity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

/// Writes analytics results as CSV (with a header row) or pretty JSON.
pub struct Exporter<'a> {
    service: &'a AnalyticsService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a AnalyticsService) -> Self {
        Self { service }
    }

    /// Export one item's rollup buckets. Returns the number of rows written.
    pub fn export_trend<W: Write>(
        &self,
        writer: W,
        format: ExportFormat,
        item_id: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize> {
        let buckets = self.service.trend(item_id, granularity, start, end)?;

        if format == ExportFormat::Json {
            write_json(writer, &buckets)?;
            return Ok(buckets.len());
        }

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record([
            "item_id",
            "period_start",
            "period_end",
            "net_change",
            "inbound_total",
            "outbound_total",
        ])?;
        for bucket in &buckets {
            csv_writer.write_record([
                bucket.item_id.clone(),
                bucket.period_start.to_rfc3339(),
                bucket.period_end.to_rfc3339(),
                bucket.net_change.to_string(),
                bucket.inbound_total.to_string(),
                bucket.outbound_total.to_string(),
            ])?;
        }
        csv_writer.flush()?;

        Ok(buckets.len())
    }

    pub fn export_top_movers<W: Write>(
        &self,
        writer: W,
        format: ExportFormat,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize> {
        let movers = self.service.top_movers(granularity, start, end, limit)?;

        if format == ExportFormat::Json {
            write_json(writer, &movers)?;
            return Ok(movers.len());
        }

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["item_id", "net_change"])?;
        for mover in &movers {
            csv_writer.write_record([mover.item_id.clone(), mover.net_change.to_string()])?;
        }
        csv_writer.flush()?;

        Ok(movers.len())
    }

    pub fn export_alerts<W: Write>(&self, writer: W, format: ExportFormat) -> Result<usize> {
        let alerts = self.service.stock_alerts()?;

        if format == ExportFormat::Json {
            write_json(writer, &alerts)?;
            return Ok(alerts.len());
        }

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["item_id", "balance", "level"])?;
        for alert in &alerts {
            csv_writer.write_record([
                alert.item_id.clone(),
                alert.balance.to_string(),
                alert.level.as_str().to_string(),
            ])?;
        }
        csv_writer.flush()?;

        Ok(alerts.len())
    }

    /// One row per item, one column per month.
    pub fn export_seasonality<W: Write>(
        &self,
        writer: W,
        format: ExportFormat,
        limit: usize,
    ) -> Result<usize> {
        let profiles = self.service.seasonality(limit)?;

        if format == ExportFormat::Json {
            write_json(writer, &profiles)?;
            return Ok(profiles.len());
        }

        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header = vec!["item_id"];
        header.extend(MONTH_NAMES);
        csv_writer.write_record(&header)?;
        for profile in &profiles {
            let mut row = vec![profile.item_id.clone()];
            row.extend(profile.monthly_units.iter().map(|units| units.to_string()));
            csv_writer.write_record(&row)?;
        }
        csv_writer.flush()?;

        Ok(profiles.len())
    }
}

fn write_json<W: Write, T: Serialize + ?Sized>(mut writer: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    Ok(())
}
