//! Shared fixtures for the stock engine integration tests.

#![allow(dead_code)]

use std::time::Duration;

use stockbook_core::{NewProduct, SaleLineItem};
use stockbook_db::{Database, DbConfig, EngineConfig, StockEngine};

pub async fn memory_engine(products: &[(&str, i64)]) -> StockEngine {
    let db = Database::in_memory().await.unwrap();
    seed(&db, products).await;
    db.engine(EngineConfig::default())
}

pub async fn file_database(path: &std::path::Path, connections: u32) -> Database {
    Database::new(
        DbConfig::new(path)
            .max_connections(connections)
            .busy_timeout(Duration::from_secs(10)),
    )
    .await
    .unwrap()
}

pub async fn seed(db: &Database, products: &[(&str, i64)]) {
    for (id, stock) in products {
        db.products()
            .insert(&NewProduct {
                id: id.to_string(),
                name: format!("Product {}", id),
                code: id.to_uppercase(),
                initial_stock: *stock,
                min_stock: 0,
            })
            .await
            .unwrap();
    }
}

/// A one-line sale `sale-{n}` buying `qty` of `product_id`.
pub fn single_line_sale(n: usize, product_id: &str, qty: i64) -> (String, Vec<SaleLineItem>) {
    let sale_id = format!("sale-{}", n);
    let item = SaleLineItem::new(format!("li-{}", n), &sale_id, product_id, qty, 199);
    (sale_id, vec![item])
}

/// `stock_quantity == initial_stock + Σ delta` for every product.
pub async fn assert_ledger_matches(engine: &StockEngine) {
    let report = engine.check_consistency(None).await.unwrap();
    assert!(
        report.is_consistent(),
        "divergences: {:?}",
        report.divergences
    );
}
