//! Runtime configuration shared by the CLI, the HTTP server and the library.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Character encoding of the source ledger file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceEncoding {
    #[default]
    Utf8,
    /// ISO-8859-1, common in spreadsheet exports
    Latin1,
}

impl SourceEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceEncoding::Utf8 => "utf-8",
            SourceEncoding::Latin1 => "latin-1",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "utf-8" | "utf8" => Some(SourceEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Some(SourceEncoding::Latin1),
            _ => None,
        }
    }
}

/// How the quantity column is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityMode {
    /// The column holds the signed delta; its sign must match the movement type.
    #[default]
    Signed,
    /// The column holds a positive magnitude; the sign comes from the movement
    /// type. Adjustments stay signed.
    Magnitude,
}

impl QuantityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantityMode::Signed => "signed",
            QuantityMode::Magnitude => "magnitude",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "signed" => Some(QuantityMode::Signed),
            "magnitude" | "unsigned" => Some(QuantityMode::Magnitude),
            _ => None,
        }
    }
}

/// Options for the ingestion loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOptions {
    pub delimiter: u8,
    pub encoding: SourceEncoding,
    pub quantity_mode: QuantityMode,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: SourceEncoding::Utf8,
            quantity_mode: QuantityMode::Signed,
        }
    }
}

/// Balance thresholds for stock alerts. A balance below `critical_below` is
/// critical, below `low_below` is low, anything else is normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub critical_below: i64,
    pub low_below: i64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            critical_below: 10,
            low_below: 50,
        }
    }
}

/// Tuning for the aggregation engine and analytics service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How many distinct `stock_at` results are memoised per item
    pub stock_cache_per_item: usize,
    /// How many distinct rollup queries are memoised across all items
    pub rollup_cache_entries: usize,
    pub alerts: AlertThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stock_cache_per_item: 64,
            rollup_cache_entries: 256,
            alerts: AlertThresholds::default(),
        }
    }
}

/// Where the store reads the ledger from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerSource {
    File(PathBuf),
    /// In-memory CSV, used by tests and by callers that fetch the file themselves
    Inline(Vec<u8>),
}

impl LedgerSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        LedgerSource::File(path.into())
    }

    pub fn inline(contents: impl Into<Vec<u8>>) -> Self {
        LedgerSource::Inline(contents.into())
    }

    pub fn describe(&self) -> String {
        match self {
            LedgerSource::File(path) => path.display().to_string(),
            LedgerSource::Inline(bytes) => format!("<inline, {} bytes>", bytes.len()),
        }
    }
}

/// Parse a single-character delimiter such as `,`, `;` or `\t`.
pub fn parse_delimiter(s: &str) -> Option<u8> {
    match s {
        "\\t" | "tab" => Some(b'\t'),
        _ => {
            let bytes = s.as_bytes();
            (bytes.len() == 1).then(|| bytes[0])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(","), Some(b','));
        assert_eq!(parse_delimiter(";"), Some(b';'));
        assert_eq!(parse_delimiter("\\t"), Some(b'\t'));
        assert_eq!(parse_delimiter("tab"), Some(b'\t'));
        assert_eq!(parse_delimiter(""), None);
        assert_eq!(parse_delimiter(",,"), None);
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!(SourceEncoding::from_str("UTF8"), Some(SourceEncoding::Utf8));
        assert_eq!(
            SourceEncoding::from_str("iso-8859-1"),
            Some(SourceEncoding::Latin1)
        );
        assert_eq!(SourceEncoding::from_str("utf-16"), None);
    }

    #[test]
    fn test_quantity_mode_names() {
        assert_eq!(QuantityMode::from_str("signed"), Some(QuantityMode::Signed));
        assert_eq!(
            QuantityMode::from_str("Magnitude"),
            Some(QuantityMode::Magnitude)
        );
        assert_eq!(QuantityMode::from_str("abs"), None);
    }
}
