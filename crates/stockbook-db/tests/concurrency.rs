//! Parallel sales against shared stock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{assert_ledger_matches, file_database, memory_engine, seed, single_line_sale};
use stockbook_core::{AdjustStock, ErrorKind, MovementType, SaleLineItem};
use stockbook_db::{DbError, EngineConfig};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_single_unit_sales_drain_stock_exactly() {
    let engine = memory_engine(&[("p-1", 10)]).await;

    let handles: Vec<_> = (0..10)
        .map(|n| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let (sale_id, items) = single_line_sale(n, "p-1", 1);
                engine.process_sale(&sale_id, &items).await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(engine.current_stock("p-1").await.unwrap(), 0);
    assert_eq!(
        engine.database().movements().count_by_product("p-1").await.unwrap(),
        10
    );
    assert_ledger_matches(&engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_of_eleven_sales_is_rejected() {
    let engine = memory_engine(&[("p-1", 10)]).await;

    let handles: Vec<_> = (0..11)
        .map(|n| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let (sale_id, items) = single_line_sale(n, "p-1", 1);
                engine.process_sale(&sale_id, &items).await
            })
        })
        .collect();

    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => {}
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::InsufficientStock);
                rejected += 1;
            }
        }
    }

    assert_eq!(rejected, 1);
    assert_eq!(engine.current_stock("p-1").await.unwrap(), 0);
    assert_ledger_matches(&engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_replays_of_one_sale_debit_once() {
    let engine = memory_engine(&[("p-1", 16)]).await;
    let (sale_id, items) = single_line_sale(1, "p-1", 4);
    let request = Arc::new((sale_id, items));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let request = Arc::clone(&request);
            tokio::spawn(async move { engine.process_sale(&request.0, &request.1).await })
        })
        .collect();

    let mut movement_ids = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        movement_ids.push(outcome.movements[0].id.clone());
    }
    movement_ids.dedup();

    assert_eq!(movement_ids.len(), 1);
    assert_eq!(engine.current_stock("p-1").await.unwrap(), 12);
    assert_ledger_matches(&engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_backed_pool_with_mixed_products() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_database(&dir.path().join("shop.db"), 4).await;
    seed(&db, &[("p-1", 10), ("p-2", 10), ("p-3", 10)]).await;
    let engine = db.engine(EngineConfig::default());

    let handles: Vec<_> = (0..10)
        .map(|n| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let sale_id = format!("sale-{}", n);
                let other = format!("p-{}", 2 + n % 2);
                let items = vec![
                    SaleLineItem::new(format!("li-{}-a", n), &sale_id, "p-1", 1, 250),
                    SaleLineItem::new(format!("li-{}-b", n), &sale_id, other, 1, 250),
                ];
                engine.process_sale(&sale_id, &items).await
            })
        })
        .collect();

    let adjuster = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .adjust_stock(&AdjustStock::new("p-3", MovementType::Inbound, 5, "delivery"))
                .await
        })
    };

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    adjuster.await.unwrap().unwrap();

    assert_eq!(engine.current_stock("p-1").await.unwrap(), 0);
    assert_eq!(engine.current_stock("p-2").await.unwrap(), 5);
    assert_eq!(engine.current_stock("p-3").await.unwrap(), 10);
    assert_ledger_matches(&engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn separate_engines_on_one_file_serialize_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");

    // Two handles with their own pools and lock registries, as two
    // processes sharing the database file would have.
    let first = file_database(&path, 3).await;
    seed(&first, &[("p-1", 10)]).await;
    let second = file_database(&path, 3).await;

    let engines = [
        first.engine(EngineConfig::default()),
        second.engine(EngineConfig::default()),
    ];

    let handles: Vec<_> = (0..10)
        .map(|n| {
            let engine = engines[n % 2].clone();
            tokio::spawn(async move {
                let (sale_id, items) = single_line_sale(n, "p-1", 1);
                engine.process_sale(&sale_id, &items).await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(engines[0].current_stock("p-1").await.unwrap(), 0);
    assert_eq!(
        first.movements().count_by_product("p-1").await.unwrap(),
        10
    );
    assert_ledger_matches(&engines[1]).await;
}

#[tokio::test]
async fn held_product_lock_times_out_and_retry_succeeds() {
    let engine = memory_engine(&[("p-1", 5)]).await;
    let engine = engine.database().engine(EngineConfig {
        lock_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    });

    let held = engine
        .locks()
        .acquire(["p-1"], Duration::from_secs(1))
        .await
        .unwrap();

    let (sale_id, items) = single_line_sale(1, "p-1", 1);
    let err = engine.process_sale(&sale_id, &items).await.unwrap_err();

    assert!(matches!(err, DbError::LockTimeout { ref product_id, .. } if product_id == "p-1"));
    assert!(err.is_retryable());
    assert_eq!(engine.current_stock("p-1").await.unwrap(), 5);

    drop(held);
    let outcome = engine.process_sale(&sale_id, &items).await.unwrap();
    assert_eq!(outcome.replayed, 0);
    assert_eq!(engine.current_stock("p-1").await.unwrap(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sale_cancelled_inside_its_transaction_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cancel.db");
    let db = file_database(&path, 2).await;
    seed(&db, &[("p-1", 5)]).await;
    let engine = db.engine(EngineConfig::default());

    // Another handle on the same file takes SQLite's write lock.
    let other = file_database(&path, 1).await;
    let mut blocker = other.pool().begin().await.unwrap();
    sqlx::query("UPDATE products SET version = version + 1 WHERE id = ?1")
        .bind("p-1")
        .execute(&mut *blocker)
        .await
        .unwrap();

    let pending = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let (sale_id, items) = single_line_sale(1, "p-1", 1);
            engine.process_sale(&sale_id, &items).await
        })
    };

    // Let the sale reach its first statement and wait on busy_timeout.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!pending.is_finished());
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    blocker.rollback().await.unwrap();

    assert_eq!(db.movements().count_by_product("p-1").await.unwrap(), 0);
    assert!(db.sales().get_by_id("sale-1").await.unwrap().is_none());
    assert_eq!(engine.current_stock("p-1").await.unwrap(), 5);

    let (sale_id, items) = single_line_sale(2, "p-1", 1);
    let outcome = engine.process_sale(&sale_id, &items).await.unwrap();
    assert_eq!(outcome.movements.len(), 1);
    assert_eq!(engine.current_stock("p-1").await.unwrap(), 4);
    assert!(engine.locks().is_empty());
    assert_ledger_matches(&engine).await;
}
