use rust_drive_backend::infrastructure::database;
use rust_drive_backend::services::quota::QuotaLedger;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;

const MB: i64 = 1024 * 1024;

async fn ledger(default_total: i64) -> (DatabaseConnection, Arc<QuotaLedger>) {
    // A single pooled connection keeps every query on the same in-memory
    // database.
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1);
    let db = Database::connect(opt).await.unwrap();
    database::run_migrations(&db).await.unwrap();
    let ledger = Arc::new(QuotaLedger::new(
        db.clone(),
        default_total,
        Duration::from_secs(60),
    ));
    (db, ledger)
}

#[tokio::test]
async fn first_touch_provisions_default_allowance() {
    let (_db, ledger) = ledger(10 * MB).await;
    assert_eq!(ledger.current_usage("newcomer").await.unwrap(), (0, 10 * MB));
}

#[tokio::test]
async fn reserve_is_conditional_on_the_allowance() {
    let (db, ledger) = ledger(10 * MB).await;

    assert!(ledger.try_reserve(&db, "u1", 6 * MB).await.unwrap());
    assert_eq!(ledger.current_usage("u1").await.unwrap(), (6 * MB, 10 * MB));

    // 6 + 6 > 10: refused with no mutation.
    assert!(!ledger.try_reserve(&db, "u1", 6 * MB).await.unwrap());
    assert_eq!(ledger.current_usage("u1").await.unwrap(), (6 * MB, 10 * MB));

    // Exactly filling the allowance is allowed.
    assert!(ledger.try_reserve(&db, "u1", 4 * MB).await.unwrap());
    assert_eq!(ledger.current_usage("u1").await.unwrap(), (10 * MB, 10 * MB));
}

#[tokio::test]
async fn release_compensates_and_clamps_at_zero() {
    let (db, ledger) = ledger(10 * MB).await;

    assert!(ledger.try_reserve(&db, "u1", 5 * MB).await.unwrap());
    ledger.release(&db, "u1", 2 * MB).await.unwrap();
    assert_eq!(ledger.current_usage("u1").await.unwrap().0, 3 * MB);

    // Releasing more than is recorded must not go negative.
    ledger.release(&db, "u1", 7 * MB).await.unwrap();
    assert_eq!(ledger.current_usage("u1").await.unwrap().0, 0);
}

#[tokio::test]
async fn successful_mutation_invalidates_the_snapshot() {
    let (db, ledger) = ledger(10 * MB).await;

    // Prime the cache.
    assert_eq!(ledger.current_usage("u1").await.unwrap().0, 0);
    assert!(ledger.try_reserve(&db, "u1", MB).await.unwrap());
    // A stale snapshot would still report 0 here.
    assert_eq!(ledger.current_usage("u1").await.unwrap().0, MB);

    // A refused reservation leaves the snapshot alone, and the snapshot
    // still matches the database.
    assert!(!ledger.try_reserve(&db, "u1", 100 * MB).await.unwrap());
    assert_eq!(ledger.current_usage("u1").await.unwrap().0, MB);
}

#[tokio::test]
async fn concurrent_reservations_never_oversubscribe() {
    let (db, ledger) = ledger(10 * MB).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let db = db.clone();
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.try_reserve(&db, "u1", MB).await.unwrap()
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }

    // Usage equals the sum of successful reservations and never exceeds the
    // allowance.
    assert_eq!(granted, 10);
    assert_eq!(ledger.current_usage("u1").await.unwrap(), (10 * MB, 10 * MB));
}

#[tokio::test]
async fn interleaved_reserve_release_stays_consistent() {
    let (db, ledger) = ledger(100 * MB).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let db = db.clone();
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                if ledger.try_reserve(&db, "u1", 2 * MB).await.unwrap() {
                    ledger.release(&db, "u1", MB).await.unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Every iteration that reserved 2MB released 1MB: 10 tasks * 5 * 1MB.
    let (used, total) = ledger.current_usage("u1").await.unwrap();
    assert_eq!(used, 50 * MB);
    assert!(used <= total);
}
