mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{ledger_csv, ledger_file, parse_date, test_service};
use stockpulse::application::AnalyticsError;
use stockpulse::config::{LedgerSource, LoaderOptions};
use stockpulse::domain::Granularity;
use stockpulse::io::IngestionError;
use stockpulse::storage::LedgerStore;

#[test]
fn test_new_store_serves_empty_ledger() {
    let store = LedgerStore::default();
    let ledger = store.current();

    assert_eq!(ledger.version(), 0);
    assert!(ledger.is_empty());
    assert!(store.item_ids().is_empty());
    assert!(store.records_for("A").is_empty());
}

#[test]
fn test_open_loads_initial_ledger() -> Result<()> {
    let source = LedgerSource::inline(ledger_csv(&[
        "A,2024-01-01,10,inbound",
        "A,2024-01-02,x,inbound",
        "B,2024-01-01,1,inbound",
    ]));

    let (store, report) = LedgerStore::open(&source, LoaderOptions::default())?;

    assert_eq!(report.version, 1);
    assert_eq!(report.rows_read, 3);
    assert_eq!(report.records, 2);
    assert_eq!(report.items, 2);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(store.records_for("A").len(), 1);

    Ok(())
}

#[test]
fn test_failed_reload_keeps_previous_ledger() -> Result<()> {
    let service = test_service(&["A,2024-01-01,10,inbound"])?;
    let version = service.store().version();

    let broken = LedgerSource::inline("item_id,fecha\nA,2024-01-01\n");
    let err = service.reload(&broken).unwrap_err();
    assert!(matches!(
        err,
        AnalyticsError::Ingestion(IngestionError::MissingColumns { .. })
    ));

    let all_bad = LedgerSource::inline(ledger_csv(&["A,2024-01-01,oops,inbound"]));
    assert!(service.reload(&all_bad).is_err());

    assert_eq!(service.store().version(), version);
    assert_eq!(service.current_stock("A")?.balance, 10);

    Ok(())
}

#[test]
fn test_reload_is_idempotent_for_queries() -> Result<()> {
    let file = ledger_file(&ledger_csv(&[
        "A,2024-01-01,10,inbound",
        "A,2024-01-05,-3,outbound",
    ]))?;
    let source = LedgerSource::file(file.path());

    let service = test_service(&["A,2024-01-01,1,inbound"])?;
    let first = service.reload(&source)?;
    let before = service.trend(
        "A",
        Granularity::Day,
        parse_date("2024-01-01"),
        parse_date("2024-01-08"),
    )?;

    let second = service.reload(&source)?;
    let after = service.trend(
        "A",
        Granularity::Day,
        parse_date("2024-01-01"),
        parse_date("2024-01-08"),
    )?;

    assert!(second.version > first.version);
    assert_eq!(before, after);
    assert_eq!(service.current_stock("A")?.balance, 7);

    Ok(())
}

#[test]
fn test_reload_invalidates_cached_results() -> Result<()> {
    let service = test_service(&["A,2024-01-01,10,inbound", "A,2024-01-05,-3,outbound"])?;
    let as_of = parse_date("2024-01-10");
    assert_eq!(service.stock_at("A", as_of)?.balance, 7);

    service.reload(&LedgerSource::inline(ledger_csv(&[
        "A,2024-01-01,10,inbound",
        "A,2024-01-05,-8,outbound",
    ])))?;

    assert_eq!(service.stock_at("A", as_of)?.balance, 2);

    Ok(())
}

#[test]
fn test_queries_during_reload_see_one_whole_ledger() -> Result<()> {
    // Old ledger: A=10, B=0. New ledger: A=20, B=5. A query must never see a
    // mix of the two.
    let old_rows = ["A,2024-01-01,10,inbound", "B,2024-01-01,0,adjustment"];
    let old = LedgerSource::inline(ledger_csv(&old_rows));
    let new = LedgerSource::inline(ledger_csv(&[
        "A,2024-01-01,20,inbound",
        "B,2024-01-01,5,inbound",
    ]));

    let service = Arc::new(test_service(&old_rows)?);

    std::thread::scope(|scope| {
        let readers: Vec<_> = (0..10)
            .map(|_| {
                let service = Arc::clone(&service);
                scope.spawn(move || {
                    for _ in 0..200 {
                        let a = service.current_stock("A").unwrap().balance;
                        assert!(a == 10 || a == 20, "torn read: A={a}");

                        let ledger = service.store().current();
                        let total: i64 = ledger.records().iter().map(|r| r.quantity_delta).sum();
                        assert!(total == 10 || total == 25, "torn snapshot: total={total}");
                    }
                })
            })
            .collect();

        for round in 0..20 {
            let source = if round % 2 == 0 { &new } else { &old };
            service.reload(source).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    });

    Ok(())
}
