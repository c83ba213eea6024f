use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use crate::application::{validate_limit, AnalyticsService, MONTH_NAMES};
use crate::config::{
    parse_delimiter, AlertThresholds, EngineConfig, LedgerSource, LoaderOptions, QuantityMode,
    SourceEncoding,
};
use crate::domain::Granularity;
use crate::io::{
    load, parse_timestamp, DiagnosticKind, ExportFormat, Exporter, IngestionError, RowDiagnostic,
};
use crate::server::{self, AppState};
use crate::storage::LedgerStore;
use crate::telemetry::LogFormat;

/// Stockpulse - inventory movement analytics
#[derive(Parser)]
#[command(name = "stockpulse")]
#[command(about = "Stock levels, trends, top movers and anomalies from an inventory movement ledger")]
#[command(version)]
pub struct Cli {
    /// Ledger CSV file
    #[arg(
        long,
        global = true,
        env = "STOCKPULSE_LEDGER",
        default_value = "movimiento_inventario.csv"
    )]
    pub ledger: PathBuf,

    /// Field delimiter (single character, or "tab")
    #[arg(long, global = true, env = "STOCKPULSE_DELIMITER", default_value = ",", value_parser = delimiter_arg)]
    pub delimiter: u8,

    /// Source encoding: utf-8, latin-1
    #[arg(long, global = true, env = "STOCKPULSE_ENCODING", default_value = "utf-8", value_parser = encoding_arg)]
    pub encoding: SourceEncoding,

    /// How to read the quantity column: signed, magnitude. Spreadsheet exports
    /// that record outbound movements as positive `cantidad` with `tipo = salida`
    /// need `magnitude`
    #[arg(long, global = true, env = "STOCKPULSE_QUANTITY_MODE", default_value = "signed", value_parser = quantity_mode_arg)]
    pub quantity_mode: QuantityMode,

    /// Number of stock-at results memoised per item
    #[arg(long, global = true, env = "STOCKPULSE_STOCK_CACHE", default_value_t = 64)]
    pub stock_cache: usize,

    /// Number of rollup queries memoised across all items
    #[arg(long, global = true, env = "STOCKPULSE_ROLLUP_CACHE", default_value_t = 256)]
    pub rollup_cache: usize,

    /// Balances below this are critical
    #[arg(long, global = true, env = "STOCKPULSE_CRITICAL_BELOW", default_value_t = 10)]
    pub critical_below: i64,

    /// Balances below this are low
    #[arg(long, global = true, env = "STOCKPULSE_LOW_BELOW", default_value_t = 50)]
    pub low_below: i64,

    /// Log output: pretty, json
    #[arg(long, global = true, env = "STOCKPULSE_LOG_FORMAT", default_value = "pretty", value_parser = log_format_arg)]
    pub log_format: LogFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, env = "STOCKPULSE_BIND", default_value = "0.0.0.0:8082")]
        bind: SocketAddr,
    },

    /// Load the ledger and report rejected rows
    Validate,

    /// List item ids present in the ledger
    Items,

    /// Show stock for an item (latest, or as of a date)
    Stock {
        /// Item id
        item: String,

        /// Point in time (YYYY-MM-DD or RFC 3339, defaults to latest movement)
        #[arg(long)]
        as_of: Option<String>,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Net/inbound/outbound totals per period for an item
    Trend {
        /// Item id
        item: String,

        /// Bucket width: day, week, month
        #[arg(short, long, default_value = "day")]
        granularity: String,

        /// Range start (defaults to the first movement in the ledger)
        #[arg(long)]
        from: Option<String>,

        /// Range end, exclusive (defaults to the day after the last movement)
        #[arg(long)]
        to: Option<String>,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Items with the largest absolute net change
    Movers {
        /// Bucket width: day, week, month
        #[arg(short, long, default_value = "day")]
        granularity: String,

        /// Range start (defaults to the first movement in the ledger)
        #[arg(long)]
        from: Option<String>,

        /// Range end, exclusive (defaults to the day after the last movement)
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of items
        #[arg(short, long, default_value_t = 10, allow_negative_numbers = true)]
        limit: i64,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Periods whose net change deviates from the item's norm
    Anomalies {
        /// Item id
        item: String,

        /// Bucket width: day, week, month
        #[arg(short, long, default_value = "day")]
        granularity: String,

        /// Standard deviations from the mean that count as anomalous
        #[arg(short, long, default_value_t = 3.0, allow_negative_numbers = true)]
        threshold: f64,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Stock alert level of every item
    Alerts {
        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Items with the highest outbound volume
    Sellers {
        /// Maximum number of items
        #[arg(short, long, default_value_t = 10, allow_negative_numbers = true)]
        limit: i64,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Monthly outbound volume of the best sellers
    Seasonality {
        /// Number of items
        #[arg(short, long, default_value_t = 5, allow_negative_numbers = true)]
        limit: i64,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Export analytics to CSV or JSON
    Export {
        /// What to export: trend, movers, alerts, seasonality
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Item id (trend)
        #[arg(long)]
        item: Option<String>,

        /// Bucket width (trend, movers)
        #[arg(short, long, default_value = "day")]
        granularity: String,

        /// Range start (trend, movers)
        #[arg(long)]
        from: Option<String>,

        /// Range end, exclusive (trend, movers)
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of items (movers, seasonality)
        #[arg(short, long, default_value_t = 10, allow_negative_numbers = true)]
        limit: i64,
    },
}

impl Cli {
    pub fn source(&self) -> LedgerSource {
        LedgerSource::file(&self.ledger)
    }

    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            delimiter: self.delimiter,
            encoding: self.encoding,
            quantity_mode: self.quantity_mode,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            stock_cache_per_item: self.stock_cache,
            rollup_cache_entries: self.rollup_cache,
            alerts: AlertThresholds {
                critical_below: self.critical_below,
                low_below: self.low_below,
            },
        }
    }

    fn service(&self) -> AnalyticsService {
        let store = Arc::new(LedgerStore::new(self.loader_options()));
        AnalyticsService::new(store, &self.engine_config())
    }

    /// Build the service and load the ledger, failing if the load fails.
    fn open_service(&self) -> Result<AnalyticsService> {
        let service = self.service();
        let report = service
            .reload(&self.source())
            .with_context(|| format!("Failed to load ledger {}", self.ledger.display()))?;

        if !report.diagnostics.is_empty() {
            eprintln!(
                "Warning: skipped {} invalid row(s) in {} (run `validate` for details)",
                report.diagnostics.len(),
                self.ledger.display()
            );
            if let Some(hint) = quantity_mode_hint(&report.diagnostics, self.quantity_mode) {
                eprintln!("Hint: {}", hint);
            }
        }
        if self.verbose {
            eprintln!(
                "Loaded {} movements for {} items (ledger version {})",
                report.records, report.items, report.version
            );
        }

        Ok(service)
    }

    pub async fn run(self) -> Result<()> {
        if self.low_below < self.critical_below {
            anyhow::bail!(
                "--low-below ({}) must not be smaller than --critical-below ({})",
                self.low_below,
                self.critical_below
            );
        }

        match &self.command {
            Commands::Serve { bind } => {
                let service = Arc::new(self.service());
                let source = self.source();

                // Start even if the file is missing or broken; POST /reload can
                // load it later.
                if let Err(e) = service.reload(&source) {
                    tracing::error!(
                        "initial ledger load failed ({}); serving an empty ledger: {}",
                        source.describe(),
                        e
                    );
                }

                let state = Arc::new(AppState::new(service, source));
                server::serve(state, *bind).await?;
            }

            Commands::Validate => run_validate_command(&self)?,

            Commands::Items => {
                let service = self.open_service()?;
                for item in service.item_ids() {
                    println!("{}", item);
                }
            }

            Commands::Stock {
                item,
                as_of,
                format,
            } => {
                let service = self.open_service()?;
                let snapshot = match as_of {
                    Some(date_str) => service.stock_at(item, parse_date(date_str)?)?,
                    None => service.current_stock(item)?,
                };

                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                } else {
                    println!(
                        "{}: {} units as of {}",
                        snapshot.item_id,
                        snapshot.balance,
                        snapshot.as_of.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }

            Commands::Trend {
                item,
                granularity,
                from,
                to,
                format,
            } => {
                let service = self.open_service()?;
                let granularity = parse_granularity(granularity)?;
                let (start, end) = parse_date_range(&service, from.as_deref(), to.as_deref())?;
                let buckets = service.trend(item, granularity, start, end)?;

                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&buckets)?);
                } else {
                    println!("Trend for {} ({})", item, granularity);
                    println!();
                    println!(
                        "{:<12} {:>10} {:>10} {:>10}",
                        "PERIOD", "IN", "OUT", "NET"
                    );
                    println!("{}", "-".repeat(45));
                    for bucket in &buckets {
                        println!(
                            "{:<12} {:>10} {:>10} {:>10}",
                            bucket.period_start.format("%Y-%m-%d"),
                            bucket.inbound_total,
                            bucket.outbound_total,
                            bucket.net_change
                        );
                    }
                }
            }

            Commands::Movers {
                granularity,
                from,
                to,
                limit,
                format,
            } => {
                let service = self.open_service()?;
                let granularity = parse_granularity(granularity)?;
                let (start, end) = parse_date_range(&service, from.as_deref(), to.as_deref())?;
                let movers = service.top_movers(granularity, start, end, validate_limit(*limit)?)?;

                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&movers)?);
                } else {
                    println!(
                        "Top movers {} to {}",
                        start.format("%Y-%m-%d"),
                        end.format("%Y-%m-%d")
                    );
                    println!();
                    println!("{:<4} {:<24} {:>12}", "#", "ITEM", "NET CHANGE");
                    println!("{}", "-".repeat(42));
                    for (i, mover) in movers.iter().enumerate() {
                        println!(
                            "{:<4} {:<24} {:>12}",
                            i + 1,
                            truncate(&mover.item_id, 24),
                            mover.net_change
                        );
                    }
                }
            }

            Commands::Anomalies {
                item,
                granularity,
                threshold,
                format,
            } => {
                let service = self.open_service()?;
                let report = service.anomaly_report(item, parse_granularity(granularity)?, *threshold)?;

                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!(
                        "{} {} buckets, mean {:.2}, std dev {:.2}, threshold {}",
                        report.item_id,
                        report.buckets_examined,
                        report.mean_net_change,
                        report.std_dev,
                        report.threshold
                    );
                    if report.anomalies.is_empty() {
                        println!("No anomalies found.");
                    } else {
                        println!();
                        println!("{:<12} {:>10} {:>8}", "PERIOD", "NET", "Z");
                        println!("{}", "-".repeat(32));
                        for flagged in &report.anomalies {
                            println!(
                                "{:<12} {:>10} {:>8.2}",
                                flagged.bucket.period_start.format("%Y-%m-%d"),
                                flagged.bucket.net_change,
                                flagged.z_score
                            );
                        }
                    }
                }
            }

            Commands::Alerts { format } => {
                let service = self.open_service()?;
                let alerts = service.stock_alerts()?;

                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&alerts)?);
                } else {
                    println!("{:<24} {:>10} {:<10}", "ITEM", "BALANCE", "LEVEL");
                    println!("{}", "-".repeat(46));
                    for alert in &alerts {
                        println!(
                            "{:<24} {:>10} {:<10}",
                            truncate(&alert.item_id, 24),
                            alert.balance,
                            alert.level
                        );
                    }
                    let distribution = service.alert_distribution()?;
                    println!("{}", "-".repeat(46));
                    println!(
                        "critical: {}  low: {}  normal: {}",
                        distribution.critical, distribution.low, distribution.normal
                    );
                }
            }

            Commands::Sellers { limit, format } => {
                let service = self.open_service()?;
                let sellers = service.top_sellers(validate_limit(*limit)?)?;

                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&sellers)?);
                } else if sellers.is_empty() {
                    println!("No outbound movements found.");
                } else {
                    println!("{:<4} {:<24} {:>12}", "#", "ITEM", "UNITS SOLD");
                    println!("{}", "-".repeat(42));
                    for (i, seller) in sellers.iter().enumerate() {
                        println!(
                            "{:<4} {:<24} {:>12}",
                            i + 1,
                            truncate(&seller.item_id, 24),
                            seller.units_sold
                        );
                    }
                }
            }

            Commands::Seasonality { limit, format } => {
                let service = self.open_service()?;
                let profiles = service.seasonality(validate_limit(*limit)?)?;

                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&profiles)?);
                } else {
                    print!("{:<16}", "ITEM");
                    for month in MONTH_NAMES {
                        print!("{:>6}", &month[..3]);
                    }
                    println!();
                    println!("{}", "-".repeat(16 + 12 * 6));
                    for profile in &profiles {
                        print!("{:<16}", truncate(&profile.item_id, 16));
                        for units in profile.monthly_units {
                            print!("{:>6}", units);
                        }
                        println!();
                    }
                }
            }

            Commands::Export {
                export_type,
                output,
                format,
                item,
                granularity,
                from,
                to,
                limit,
            } => {
                let service = self.open_service()?;
                let args = ExportArgs {
                    export_type,
                    output: output.as_ref(),
                    format,
                    item: item.as_deref(),
                    granularity,
                    from: from.as_deref(),
                    to: to.as_deref(),
                    limit: *limit,
                };
                run_export_command(&service, args)?;
            }
        }

        Ok(())
    }
}

fn run_validate_command(cli: &Cli) -> Result<()> {
    let outcome = match load(&cli.source(), &cli.loader_options()) {
        Ok(outcome) => outcome,
        Err(e) => {
            if let IngestionError::NoValidRows { diagnostics } = &e {
                if let Some(hint) = quantity_mode_hint(diagnostics, cli.quantity_mode) {
                    eprintln!("Hint: {}", hint);
                }
            }
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to load ledger {}", cli.ledger.display())));
        }
    };

    println!("Ledger: {}", cli.ledger.display());
    println!("  Rows read: {}", outcome.rows_read);
    println!("  Accepted:  {}", outcome.ledger.len());
    println!("  Rejected:  {}", outcome.diagnostics.len());
    println!("  Items:     {}", outcome.ledger.item_count());

    if !outcome.diagnostics.is_empty() {
        let shown = if cli.verbose { usize::MAX } else { 10 };
        println!("\nRejected rows:");
        for diagnostic in outcome.diagnostics.iter().take(shown) {
            println!(
                "  Line {}: {}",
                diagnostic.line,
                diagnostic
                    .field
                    .as_ref()
                    .map(|f| format!("{}: ", f))
                    .unwrap_or_default()
                    + &diagnostic.reason
            );
        }
        if outcome.diagnostics.len() > shown {
            println!(
                "  ... and {} more (use --verbose to list all)",
                outcome.diagnostics.len() - shown
            );
        }
        if let Some(hint) = quantity_mode_hint(&outcome.diagnostics, cli.quantity_mode) {
            println!("\nHint: {}", hint);
        }
    }

    Ok(())
}

/// Suggest `--quantity-mode magnitude` when most rejected rows carry a positive
/// quantity on an outbound movement, the layout of older spreadsheet exports.
fn quantity_mode_hint(diagnostics: &[RowDiagnostic], mode: QuantityMode) -> Option<String> {
    let mismatches = diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::SignMismatch)
        .count();

    (mode == QuantityMode::Signed && mismatches > 0 && mismatches * 2 > diagnostics.len()).then(
        || {
            format!(
                "{} of {} rejected row(s) have a quantity sign that disagrees with the \
                 movement type; if the file stores unsigned quantities, rerun with \
                 --quantity-mode magnitude",
                mismatches,
                diagnostics.len()
            )
        },
    )
}

struct ExportArgs<'a> {
    export_type: &'a str,
    output: Option<&'a PathBuf>,
    format: &'a str,
    item: Option<&'a str>,
    granularity: &'a str,
    from: Option<&'a str>,
    to: Option<&'a str>,
    limit: i64,
}

fn run_export_command(service: &AnalyticsService, args: ExportArgs<'_>) -> Result<()> {
    use std::fs::File;
    use std::io::{stdout, Write};

    let format = ExportFormat::from_str(args.format).ok_or_else(|| {
        anyhow::anyhow!("Invalid format '{}'. Valid formats: csv, json", args.format)
    })?;

    let writer: Box<dyn Write> = match args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let exporter = Exporter::new(service);

    let count = match args.export_type {
        "trend" => {
            let item = args
                .item
                .ok_or_else(|| anyhow::anyhow!("--item is required for trend exports"))?;
            let granularity = parse_granularity(args.granularity)?;
            let (start, end) = parse_date_range(service, args.from, args.to)?;
            exporter.export_trend(writer, format, item, granularity, start, end)?
        }
        "movers" => {
            let granularity = parse_granularity(args.granularity)?;
            let (start, end) = parse_date_range(service, args.from, args.to)?;
            exporter.export_top_movers(
                writer,
                format,
                granularity,
                start,
                end,
                validate_limit(args.limit)?,
            )?
        }
        "alerts" => exporter.export_alerts(writer, format)?,
        "seasonality" => {
            exporter.export_seasonality(writer, format, validate_limit(args.limit)?)?
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: trend, movers, alerts, seasonality",
                args.export_type
            );
        }
    };

    if let Some(path) = args.output {
        eprintln!("Exported {} row(s) to {}", count, path.display());
    }

    Ok(())
}

/// Resolve an optional `--from`/`--to` pair. Missing bounds default to the
/// ledger's extent: the day of the first movement through the day after the
/// last one.
fn parse_date_range(
    service: &AnalyticsService,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let ledger = service.store().current();

    let start = match from {
        Some(date_str) => parse_date(date_str)?,
        None => {
            let first = ledger
                .records()
                .first()
                .map(|r| r.timestamp)
                .ok_or_else(|| anyhow::anyhow!("Ledger is empty; pass --from explicitly"))?;
            Granularity::Day.floor(first)
        }
    };

    let end = match to {
        Some(date_str) => parse_date(date_str)?,
        None => {
            let latest = ledger
                .latest_timestamp()
                .ok_or_else(|| anyhow::anyhow!("Ledger is empty; pass --to explicitly"))?;
            Granularity::Day.next_start(Granularity::Day.floor(latest))
        }
    };

    Ok((start, end))
}

fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(date_str).with_context(|| {
        format!(
            "Invalid date '{}'. Use YYYY-MM-DD or an RFC 3339 timestamp",
            date_str
        )
    })
}

fn parse_granularity(s: &str) -> Result<Granularity> {
    Granularity::from_str(s).ok_or_else(|| {
        anyhow::anyhow!("Invalid granularity '{}'. Valid: day, week, month", s)
    })
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

fn delimiter_arg(s: &str) -> Result<u8, String> {
    parse_delimiter(s).ok_or_else(|| format!("'{}' is not a single-byte delimiter", s))
}

fn encoding_arg(s: &str) -> Result<SourceEncoding, String> {
    SourceEncoding::from_str(s).ok_or_else(|| format!("unsupported encoding '{}'", s))
}

fn quantity_mode_arg(s: &str) -> Result<QuantityMode, String> {
    QuantityMode::from_str(s).ok_or_else(|| format!("'{}' is not one of: signed, magnitude", s))
}

fn log_format_arg(s: &str) -> Result<LogFormat, String> {
    LogFormat::from_str(s).ok_or_else(|| format!("'{}' is not one of: pretty, json", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["stockpulse", "validate"]).unwrap();
        assert_eq!(cli.loader_options(), LoaderOptions::default());
        assert_eq!(cli.engine_config(), EngineConfig::default());
    }

    #[test]
    fn test_loader_options_from_flags() {
        let cli = Cli::try_parse_from([
            "stockpulse",
            "--delimiter",
            ";",
            "--encoding",
            "latin-1",
            "--quantity-mode",
            "magnitude",
            "items",
        ])
        .unwrap();

        let options = cli.loader_options();
        assert_eq!(options.delimiter, b';');
        assert_eq!(options.encoding, SourceEncoding::Latin1);
        assert_eq!(options.quantity_mode, QuantityMode::Magnitude);
    }

    #[test]
    fn test_rejects_bad_delimiter() {
        assert!(Cli::try_parse_from(["stockpulse", "--delimiter", ";;", "items"]).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("almacén-central-norte", 10), "almacén...");
    }

    #[test]
    fn test_quantity_mode_hint_for_unsigned_exports() {
        let csv = "producto_id,fecha,cantidad,tipo\n\
                   A,2024-01-01,10,entrada\n\
                   A,2024-01-02,4,salida\n\
                   A,2024-01-03,2,salida\n\
                   A,2024-01-04,x,salida\n";

        let outcome = load(&LedgerSource::inline(csv), &LoaderOptions::default()).unwrap();
        assert_eq!(outcome.diagnostics.len(), 3);

        let hint = quantity_mode_hint(&outcome.diagnostics, QuantityMode::Signed).unwrap();
        assert!(hint.starts_with("2 of 3"));
        assert!(hint.contains("--quantity-mode magnitude"));

        assert_eq!(
            quantity_mode_hint(&outcome.diagnostics, QuantityMode::Magnitude),
            None
        );
        assert_eq!(
            quantity_mode_hint(&outcome.diagnostics[2..], QuantityMode::Signed),
            None
        );

        let options = LoaderOptions {
            quantity_mode: QuantityMode::Magnitude,
            ..LoaderOptions::default()
        };
        let outcome = load(&LedgerSource::inline(csv), &options).unwrap();
        assert_eq!(outcome.diagnostics.len(), 1);
    }
}
