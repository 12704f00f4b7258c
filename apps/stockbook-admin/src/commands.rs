//! Command handlers. Each one maps to a single engine operation.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use stockbook_core::{AdjustStock, HistoryRange, NewProduct, SaleLineItem};
use stockbook_db::StockEngine;
use tracing::warn;

use crate::Command;

/// Sale payload accepted by `sell`.
///
/// ```json
/// { "sale_id": "s-1", "line_items": [
///     { "id": "li-1", "product_id": "p-1", "quantity": 2, "unit_price_cents": 450 } ] }
/// ```
#[derive(Debug, Deserialize)]
struct SalePayload {
    sale_id: String,
    line_items: Vec<LinePayload>,
}

#[derive(Debug, Deserialize)]
struct LinePayload {
    id: String,
    product_id: String,
    quantity: i64,
    unit_price_cents: i64,
}

impl SalePayload {
    fn into_line_items(self) -> (String, Vec<SaleLineItem>) {
        let items = self
            .line_items
            .into_iter()
            .map(|line| {
                SaleLineItem::new(
                    line.id,
                    &self.sale_id,
                    line.product_id,
                    line.quantity,
                    line.unit_price_cents,
                )
            })
            .collect();
        (self.sale_id, items)
    }
}

/// Runs one command, writing its JSON result to `out`.
pub async fn run<W: Write>(engine: &StockEngine, command: Command, out: &mut W) -> anyhow::Result<()> {
    match command {
        Command::AddProduct {
            id,
            code,
            name,
            stock,
            min_stock,
        } => {
            let product = engine
                .database()
                .products()
                .insert(&NewProduct {
                    id,
                    name,
                    code,
                    initial_stock: stock,
                    min_stock,
                })
                .await?;
            write_json(out, &product)
        }

        Command::Products => {
            let products = engine.database().products().list().await?;
            let low = products.iter().filter(|p| p.is_low_stock()).count();
            if low > 0 {
                warn!(low, "Products at or below minimum stock");
            }
            write_json(out, &products)
        }

        Command::Sell { file } => {
            let (sale_id, items) = read_sale(&file)?.into_line_items();
            let outcome = engine.process_sale(&sale_id, &items).await?;
            write_json(out, &outcome)
        }

        Command::Adjust {
            product,
            movement_type,
            quantity,
            reason,
            actor,
            key,
            allow_negative,
        } => {
            let mut req = AdjustStock::new(product, movement_type, quantity, reason)
                .allow_negative(allow_negative);
            if let Some(actor) = actor {
                req = req.actor(actor);
            }
            if let Some(key) = key {
                req = req.idempotency_key(key);
            }
            let movement = engine.adjust_stock(&req).await?;
            write_json(out, &movement)
        }

        Command::Reverse { movement_id, actor } => {
            let movement = engine
                .reverse_movement(&movement_id, actor.as_deref())
                .await?;
            write_json(out, &movement)
        }

        Command::Void { sale_id, actor } => {
            let reversals = engine.void_sale(&sale_id, actor.as_deref()).await?;
            write_json(out, &reversals)
        }

        Command::History {
            product,
            page_size,
            from,
            to,
        } => {
            let range = HistoryRange {
                from,
                to,
                page_size,
            };
            let mut history = engine.stock_history(&product, range).await?;
            loop {
                let page = history.next_page().await?;
                if page.is_empty() {
                    break;
                }
                for movement in page {
                    writeln!(out, "{}", serde_json::to_string(&movement)?)?;
                }
            }
            Ok(())
        }

        Command::Check { product } => {
            let report = engine.check_consistency(product.as_deref()).await?;
            write_json(out, &report)?;
            if !report.is_consistent() {
                warn!(divergences = report.divergences.len(), "Ledger check failed");
            }
            report.ensure_consistent()?;
            Ok(())
        }

        // handled before the database is opened
        Command::Config => Ok(()),
    }
}

fn read_sale(path: &Path) -> anyhow::Result<SalePayload> {
    let contents = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading sale from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };

    serde_json::from_str(&contents).context("parsing sale payload")
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> anyhow::Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockbook_db::{Database, EngineConfig};

    #[test]
    fn test_sale_payload_fills_sale_id() {
        let payload: SalePayload = serde_json::from_str(
            r#"{
                "sale_id": "s-1",
                "line_items": [
                    { "id": "li-1", "product_id": "p-1", "quantity": 2, "unit_price_cents": 450 },
                    { "id": "li-2", "product_id": "p-2", "quantity": 1, "unit_price_cents": 0 }
                ]
            }"#,
        )
        .unwrap();

        let (sale_id, items) = payload.into_line_items();

        assert_eq!(sale_id, "s-1");
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.sale_id == "s-1"));
        assert_eq!(items[0].unit_price_cents, 450);
        assert_eq!(items[1].unit_price_cents, 0);
    }

    #[test]
    fn test_sale_payload_requires_unit_price() {
        let result: Result<SalePayload, _> = serde_json::from_str(
            r#"{
                "sale_id": "s-1",
                "line_items": [ { "id": "li-1", "product_id": "p-1", "quantity": 2 } ]
            }"#,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_products_are_written_as_json() {
        let db = Database::in_memory().await.unwrap();
        let engine = db.engine(EngineConfig::default());
        let mut out = Vec::new();

        run(
            &engine,
            Command::AddProduct {
                id: "p-1".into(),
                code: "TEA".into(),
                name: "Green tea".into(),
                stock: 2,
                min_stock: 5,
            },
            &mut out,
        )
        .await
        .unwrap();

        out.clear();
        run(&engine, Command::Products, &mut out).await.unwrap();

        let products: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(products.as_array().map(Vec::len), Some(1));
        assert_eq!(products[0]["code"], "TEA");
        assert_eq!(products[0]["stock_quantity"], 2);
    }

    #[test]
    fn test_sale_payload_requires_line_items() {
        let result: Result<SalePayload, _> = serde_json::from_str(r#"{ "sale_id": "s-1" }"#);
        assert!(result.is_err());
    }
}
