// Application layer: the aggregation engine and the query service built on it.
// Everything here reads a ledger snapshot from the store; nothing writes to it.

pub mod aggregation;
pub mod error;
pub mod reporting;
pub mod service;

pub use aggregation::*;
pub use error::*;
pub use reporting::*;
pub use service::*;
