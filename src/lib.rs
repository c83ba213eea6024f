pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod io;
pub mod server;
pub mod storage;
pub mod telemetry;

pub use application::{AnalyticsError, AnalyticsService};
pub use domain::*;
pub use storage::LedgerStore;
