use std::fs::File;
use std::io::Read;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{LedgerSource, LoaderOptions, QuantityMode, SourceEncoding};
use crate::domain::{parse_cents, Ledger, MovementError, MovementRecord, MovementType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Unparseable or out-of-range value
    #[default]
    Malformed,
    /// Quantity sign disagrees with the movement type
    SignMismatch,
}

/// A row that was dropped from the ledger, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowDiagnostic {
    /// 1-based data row index (the header is not counted)
    pub row: usize,
    /// Physical line where the record starts, header included. Differs from
    /// `row + 1` once a quoted field spans several lines.
    pub line: usize,
    pub field: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub kind: DiagnosticKind,
}

impl RowDiagnostic {
    fn new(row: usize, field: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            row,
            line: row + 1,
            field: field.map(str::to_string),
            reason: reason.into(),
            kind: DiagnosticKind::Malformed,
        }
    }

    fn at_line(mut self, line: Option<u64>) -> Self {
        if let Some(line) = line.and_then(|l| usize::try_from(l).ok()) {
            self.line = line;
        }
        self
    }

    fn with_kind(mut self, kind: DiagnosticKind) -> Self {
        self.kind = kind;
        self
    }
}

impl std::fmt::Display for RowDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "row {} ({}): {}", self.row, field, self.reason),
            None => write!(f, "row {}: {}", self.row, self.reason),
        }
    }
}

/// Result of a successful load: the ledger plus the rows that were dropped.
/// Diagnostics are warnings, callers are expected to report them.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub ledger: Ledger,
    pub diagnostics: Vec<RowDiagnostic>,
    pub rows_read: usize,
}

impl LoadOutcome {
    pub fn sign_mismatches(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::SignMismatch)
            .count()
    }
}

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Missing required columns: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("No valid rows in ledger source ({} rejected)", diagnostics.len())]
    NoValidRows { diagnostics: Vec<RowDiagnostic> },

    #[error("Source is not valid {encoding}: {reason}")]
    Encoding {
        encoding: &'static str,
        reason: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error reading ledger: {0}")]
    Io(#[from] std::io::Error),
}

/// Canonical column names followed by accepted aliases.
const ITEM_ID: &[&str] = &["item_id", "producto_id", "product_id", "sku"];
const TIMESTAMP: &[&str] = &["timestamp", "fecha", "date"];
const QUANTITY: &[&str] = &["quantity_delta", "cantidad", "quantity"];
const MOVEMENT_TYPE: &[&str] = &["movement_type", "tipo", "type"];
const WAREHOUSE_ID: &[&str] = &["warehouse_id", "almacen_id", "warehouse"];
const UNIT_COST: &[&str] = &["unit_cost", "costo_unitario", "cost"];

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy)]
struct Columns {
    item_id: usize,
    timestamp: usize,
    quantity: usize,
    movement_type: usize,
    warehouse_id: Option<usize>,
    unit_cost: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, IngestionError> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };

        let item_id = find(ITEM_ID);
        let timestamp = find(TIMESTAMP);
        let quantity = find(QUANTITY);
        let movement_type = find(MOVEMENT_TYPE);

        match (item_id, timestamp, quantity, movement_type) {
            (Some(item_id), Some(timestamp), Some(quantity), Some(movement_type)) => Ok(Self {
                item_id,
                timestamp,
                quantity,
                movement_type,
                warehouse_id: find(WAREHOUSE_ID),
                unit_cost: find(UNIT_COST),
            }),
            _ => {
                let missing = [
                    (item_id, ITEM_ID[0]),
                    (timestamp, TIMESTAMP[0]),
                    (quantity, QUANTITY[0]),
                    (movement_type, MOVEMENT_TYPE[0]),
                ]
                .into_iter()
                .filter(|(found, _)| found.is_none())
                .map(|(_, name)| name.to_string())
                .collect();
                Err(IngestionError::MissingColumns { missing })
            }
        }
    }
}

/// Load a ledger from a file or in-memory source.
pub fn load(source: &LedgerSource, options: &LoaderOptions) -> Result<LoadOutcome, IngestionError> {
    match source {
        LedgerSource::File(path) => load_reader(File::open(path)?, options),
        LedgerSource::Inline(bytes) => load_reader(bytes.as_slice(), options),
    }
}

/// Parse a ledger from any reader.
///
/// Each row is validated on its own; rows that fail are reported in the
/// outcome's diagnostics and left out of the ledger. The load only fails when
/// required columns are missing or no row survives.
pub fn load_reader<R: Read>(
    mut reader: R,
    options: &LoaderOptions,
) -> Result<LoadOutcome, IngestionError> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    let text = decode(raw, options.encoding)?;

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let columns = Columns::resolve(csv_reader.headers()?)?;

    let mut records = Vec::new();
    let mut diagnostics = Vec::new();
    let mut rows_read = 0;

    for (idx, result) in csv_reader.records().enumerate() {
        let row = idx + 1;
        rows_read += 1;

        let csv_record = match result {
            Ok(r) => r,
            Err(e) => {
                let line = e.position().map(|p| p.line());
                diagnostics.push(
                    RowDiagnostic::new(row, None, format!("CSV parse error: {}", e)).at_line(line),
                );
                continue;
            }
        };

        let line = csv_record.position().map(|p| p.line());
        match parse_row(&csv_record, &columns, options.quantity_mode, row) {
            Ok(record) => records.push(record.with_sequence(idx as u64)),
            Err(diagnostic) => diagnostics.push(diagnostic.at_line(line)),
        }
    }

    if records.is_empty() {
        return Err(IngestionError::NoValidRows { diagnostics });
    }

    tracing::debug!(
        rows = rows_read,
        accepted = records.len(),
        rejected = diagnostics.len(),
        "parsed ledger source"
    );

    Ok(LoadOutcome {
        ledger: Ledger::from_records(records),
        diagnostics,
        rows_read,
    })
}

fn decode(raw: Vec<u8>, encoding: SourceEncoding) -> Result<String, IngestionError> {
    let text = match encoding {
        SourceEncoding::Utf8 => String::from_utf8(raw).map_err(|e| IngestionError::Encoding {
            encoding: encoding.as_str(),
            reason: e.utf8_error().to_string(),
        })?,
        // Latin-1 maps each byte to the code point with the same value.
        SourceEncoding::Latin1 => raw.into_iter().map(char::from).collect(),
    };

    const BOM: char = '\u{feff}';
    if text.starts_with(BOM) {
        Ok(text[BOM.len_utf8()..].to_string())
    } else {
        Ok(text)
    }
}

fn parse_row(
    record: &csv::StringRecord,
    columns: &Columns,
    quantity_mode: QuantityMode,
    row: usize,
) -> Result<MovementRecord, RowDiagnostic> {
    let cell = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");
    let optional = |idx: Option<usize>| idx.map(cell).filter(|s| !s.is_empty());

    let item_id = cell(columns.item_id);

    let timestamp = parse_timestamp(cell(columns.timestamp)).map_err(|e| {
        RowDiagnostic::new(row, Some("timestamp"), e.to_string())
    })?;

    let movement_type = MovementType::from_str(cell(columns.movement_type)).ok_or_else(|| {
        RowDiagnostic::new(
            row,
            Some("movement_type"),
            format!(
                "Unknown movement type '{}' (expected inbound, outbound or adjustment)",
                cell(columns.movement_type)
            ),
        )
    })?;

    let quantity_str = cell(columns.quantity);
    let quantity: i64 = quantity_str.parse().map_err(|_| {
        RowDiagnostic::new(
            row,
            Some("quantity_delta"),
            format!("Invalid quantity '{}': expected an integer", quantity_str),
        )
    })?;

    let quantity_delta = match (quantity_mode, movement_type) {
        (QuantityMode::Signed, _) | (QuantityMode::Magnitude, MovementType::Adjustment) => quantity,
        (QuantityMode::Magnitude, _) if quantity <= 0 => {
            return Err(RowDiagnostic::new(
                row,
                Some("quantity_delta"),
                format!("Quantity {} must be a positive magnitude", quantity),
            ));
        }
        (QuantityMode::Magnitude, MovementType::Outbound) => -quantity,
        (QuantityMode::Magnitude, MovementType::Inbound) => quantity,
    };

    let mut movement = MovementRecord::new(item_id, timestamp, quantity_delta, movement_type)
        .map_err(|e| {
            let (field, kind) = match &e {
                MovementError::EmptyItemId => ("item_id", DiagnosticKind::Malformed),
                MovementError::SignMismatch { .. } => {
                    ("quantity_delta", DiagnosticKind::SignMismatch)
                }
                MovementError::OutOfRange { .. } => ("quantity_delta", DiagnosticKind::Malformed),
            };
            RowDiagnostic::new(row, Some(field), e.to_string()).with_kind(kind)
        })?;

    if let Some(warehouse) = optional(columns.warehouse_id) {
        movement = movement.with_warehouse(warehouse);
    }

    if let Some(cost_str) = optional(columns.unit_cost) {
        let cost = parse_cents(cost_str).map_err(|e| {
            RowDiagnostic::new(
                row,
                Some("unit_cost"),
                format!("Invalid unit cost '{}': {}", cost_str, e),
            )
        })?;
        if cost < 0 {
            return Err(RowDiagnostic::new(
                row,
                Some("unit_cost"),
                "Unit cost must not be negative",
            ));
        }
        movement = movement.with_unit_cost(cost);
    }

    Ok(movement)
}

/// Parse an ISO-8601 style timestamp. Values without an offset are taken as UTC;
/// a bare date means midnight.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TimestampError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }

    Err(TimestampError(s.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid timestamp '{0}': expected RFC 3339, YYYY-MM-DD HH:MM:SS or YYYY-MM-DD")]
pub struct TimestampError(pub String);
