mod common;

use rusqlite::Connection;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::day;
use dan_engine::assembler::assemble_entry;
use dan_engine::{
    Config, DanError, DanService, Entry, EntryRepository, ErrorKind, InMemoryRepository, Outcome,
    Page, ReconcileSettings, Reconciler, SqliteDrawStore, SqliteRepository, UpsertGuard, Width,
};
use tempfile::TempDir;

const DRAW_2025_01_10: &str = r#"{
    "statusMessage": "ok",
    "statusCode": 200,
    "status": true,
    "response": {
        "result": {
            "date": "2025-01-10",
            "data": {
                "special": { "price": "2000000000", "number": [ { "round": 1, "value": "48202" } ] },
                "first": { "number": [ { "round": 1, "value": "31567" } ] }
            }
        }
    }
}"#;

fn config_in(dir: &TempDir) -> Config {
    Config {
        database_url: dir.path().join("data").join("dan.db").to_string_lossy().into_owned(),
        ..Config::default()
    }
}

#[tokio::test]
async fn end_to_end_on_disk() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    SqliteDrawStore::open(&config.database_url)
        .unwrap()
        .parse_and_insert_raw_json(DRAW_2025_01_10)
        .unwrap();

    let service = DanService::open(&config).unwrap();
    service
        .submit_entry("A", day(10), "3X 101 202 303", Some(Width::THREE))
        .unwrap();
    let c = service.submit_entry("C", day(10), "12 345", None).unwrap();
    assert_eq!(c.warnings.len(), 1);
    assert_eq!(c.entry.resolved_numbers.len(), 1);
    service.submit_entry("A", day(11), "99", None).unwrap();

    let report = service.run_reconciliation(None).await.unwrap();
    assert_eq!(report.processed, 2);
    assert!(report.errors.is_empty());

    // A fresh service on the same file sees the settled outcomes.
    let reopened = DanService::open(&config).unwrap();
    let a = reopened.get_entry("A", day(10)).unwrap();
    assert_eq!(a.outcome, Outcome::Hit);
    assert_eq!(a.note, "Trúng: 3X");

    let c = reopened.get_entry("C", day(10)).unwrap();
    assert_eq!(c.outcome, Outcome::Miss);

    let later = reopened.get_entry("A", day(11)).unwrap();
    assert_eq!(later.outcome, Outcome::Pending);
    assert_eq!(later.note, "...");

    assert_eq!(reopened.list_owners().unwrap(), vec!["A", "C"]);
    assert_eq!(
        reopened
            .list_entries(None, Some("A"), Page::default())
            .unwrap()
            .iter()
            .map(|e| e.day)
            .collect::<Vec<_>>(),
        vec![day(11), day(10)]
    );
}

#[test]
fn blank_text_never_wins_a_write_race() {
    let dir = TempDir::new().unwrap();
    let path = config_in(&dir).database_url;
    let repo = Arc::new(SqliteRepository::open(&path).unwrap());

    let (seed, _) = assemble_entry("A", day(10), "01 02", Width::TWO).unwrap();
    repo.upsert(seed, UpsertGuard::Always).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                for n in 0..20 {
                    let entry = if (i + n) % 2 == 0 {
                        Entry::new("A", day(10), Width::TWO, "   ", Vec::new())
                    } else {
                        assemble_entry("A", day(10), &format!("{:02}", n), Width::TWO).unwrap().0
                    };
                    repo.upsert(entry, UpsertGuard::Always).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stored = repo.get("A", day(10)).unwrap().unwrap();
    assert!(!stored.raw_text.trim().is_empty());
    assert_eq!(stored.resolved_numbers.len(), 1);
    assert_eq!(repo.list_by_day(day(10)).unwrap().len(), 1);
}

#[test]
fn separate_connections_serialize_writes() {
    let dir = TempDir::new().unwrap();
    let path = config_in(&dir).database_url;
    let first = SqliteRepository::open(&path).unwrap();
    let second = SqliteRepository::open(&path).unwrap();

    let stored = first
        .upsert(assemble_entry("A", day(10), "01", Width::TWO).unwrap().0, UpsertGuard::Always)
        .unwrap();
    second
        .upsert(assemble_entry("A", day(10), "02", Width::TWO).unwrap().0, UpsertGuard::Always)
        .unwrap();

    let mut stale = stored.clone();
    stale.outcome = Outcome::Miss;
    assert!(matches!(
        first.upsert(stale, UpsertGuard::UnchangedSince(stored.updated_at)),
        Err(DanError::Conflict(_))
    ));
    assert_eq!(first.get("A", day(10)).unwrap().unwrap().raw_text, "02");
}

#[tokio::test]
async fn locked_draw_store_is_bounded_by_fetch_timeout() {
    let dir = TempDir::new().unwrap();
    let path = config_in(&dir).database_url;
    let store = SqliteDrawStore::open(&path).unwrap();
    store.parse_and_insert_raw_json(DRAW_2025_01_10).unwrap();

    let locker = Connection::open(&path).unwrap();
    locker.execute_batch("BEGIN EXCLUSIVE;").unwrap();

    let repo = Arc::new(InMemoryRepository::new());
    let (entry, _) = assemble_entry("A", day(10), "02", Width::TWO).unwrap();
    repo.upsert(entry, UpsertGuard::Always).unwrap();
    let reconciler = Reconciler::new(
        repo.clone(),
        Arc::new(store),
        ReconcileSettings {
            fetch_timeout: Duration::from_millis(100),
            ..ReconcileSettings::default()
        },
    );

    let started = Instant::now();
    let report = reconciler.reconcile(day(10), false).await;
    let elapsed = started.elapsed();
    locker.execute_batch("ROLLBACK;").unwrap();

    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    assert_eq!(report.processed, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, ErrorKind::TransientIo);
    assert!(report.errors[0].message.contains("timed out"));
    assert_eq!(repo.get("A", day(10)).unwrap().unwrap().outcome, Outcome::Pending);
}
