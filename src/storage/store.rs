use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::{LedgerSource, LoaderOptions};
use crate::domain::{Ledger, MovementRecord};
use crate::io::{load, IngestionError, RowDiagnostic};

/// Summary of a successful reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadReport {
    pub version: u64,
    pub rows_read: usize,
    pub records: usize,
    pub items: usize,
    pub diagnostics: Vec<RowDiagnostic>,
}

/// Process-wide holder of the current ledger.
///
/// The ledger is published as an immutable `Arc` snapshot. Readers clone the
/// pointer and keep working on that snapshot for as long as they need it, so a
/// reload never shows them a half-built ledger. A failed reload leaves the
/// previous snapshot in place.
#[derive(Debug)]
pub struct LedgerStore {
    current: RwLock<Arc<Ledger>>,
    options: LoaderOptions,
}

impl LedgerStore {
    /// A store serving the empty ledger (version 0).
    pub fn new(options: LoaderOptions) -> Self {
        Self {
            current: RwLock::new(Arc::new(Ledger::empty())),
            options,
        }
    }

    /// Create a store and perform the initial load.
    pub fn open(
        source: &LedgerSource,
        options: LoaderOptions,
    ) -> Result<(Self, ReloadReport), IngestionError> {
        let store = Self::new(options);
        let report = store.reload(source)?;
        Ok((store, report))
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// The ledger snapshot currently published.
    pub fn current(&self) -> Arc<Ledger> {
        // The lock only guards a pointer swap, so a poisoned lock still holds
        // a complete snapshot.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn version(&self) -> u64 {
        self.current().version()
    }

    /// Parse `source` and, only if that succeeds, publish it as the new ledger.
    pub fn reload(&self, source: &LedgerSource) -> Result<ReloadReport, IngestionError> {
        let outcome = match load(source, &self.options) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    source = %source.describe(),
                    error = %e,
                    version = self.version(),
                    "ledger reload failed; keeping current ledger"
                );
                return Err(e);
            }
        };

        for diagnostic in &outcome.diagnostics {
            tracing::warn!(
                row = diagnostic.row,
                field = diagnostic.field.as_deref().unwrap_or("-"),
                "skipped ledger row: {}",
                diagnostic.reason
            );
        }

        let ledger = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let version = guard.version() + 1;
            let ledger = Arc::new(outcome.ledger.with_version(version));
            *guard = Arc::clone(&ledger);
            ledger
        };

        tracing::info!(
            source = %source.describe(),
            version = ledger.version(),
            records = ledger.len(),
            items = ledger.item_count(),
            rejected = outcome.diagnostics.len(),
            "ledger loaded"
        );

        Ok(ReloadReport {
            version: ledger.version(),
            rows_read: outcome.rows_read,
            records: ledger.len(),
            items: ledger.item_count(),
            diagnostics: outcome.diagnostics,
        })
    }

    /// Movements of one item, in ledger order, from the current snapshot.
    pub fn records_for(&self, item_id: &str) -> Vec<MovementRecord> {
        self.current()
            .records_for(item_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn item_ids(&self) -> BTreeSet<String> {
        self.current().item_ids()
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new(LoaderOptions::default())
    }
}
