//! # Inventory Ledger
//!
//! Per-product and per-gift stock counters with reserve/restore.
//!
//! ## Guarded Decrement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  reserve(item, qty) as compare-and-swap                 │
//! │                                                                         │
//! │  UPDATE products                                                       │
//! │     SET inventory = inventory - qty                                    │
//! │   WHERE id = item AND inventory >= qty      ◄── check and write are    │
//! │                                                 one statement          │
//! │       │                                                                 │
//! │       ├── 1 row  ──► reserved                                          │
//! │       └── 0 rows ──► SELECT inventory                                  │
//! │                        ├── no row ──► ProductNotFound / GiftNotFound   │
//! │                        └── n < qty ──► InsufficientStock { n, qty }    │
//! │                                                                         │
//! │  Two terminals racing for the last unit: exactly one UPDATE matches.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The free functions take a connection so order creation and redemption
//! can reserve inside their own transaction. [`InventoryLedger`] wraps
//! them as standalone single-transaction operations.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use settle_core::{CoreError, ValidationError};

use crate::error::{DbError, DbResult};
use crate::pool::{begin_write, EngineContext};
use crate::repository::timestamp;

/// Which stock counter to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockKind {
    Product,
    Gift,
}

impl StockKind {
    fn table(self) -> &'static str {
        match self {
            StockKind::Product => "products",
            StockKind::Gift => "gifts",
        }
    }

    fn not_found(self, id: &str) -> CoreError {
        match self {
            StockKind::Product => CoreError::ProductNotFound(id.to_string()),
            StockKind::Gift => CoreError::GiftNotFound(id.to_string()),
        }
    }
}

fn ensure_positive(qty: i64) -> DbResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Current stock, `None` when the item does not exist.
pub(crate) async fn stock_level(
    conn: &mut SqliteConnection,
    kind: StockKind,
    item_id: &str,
) -> DbResult<Option<i64>> {
    let sql = format!("SELECT inventory FROM {} WHERE id = ?1", kind.table());
    let level: Option<i64> = sqlx::query_scalar(&sql)
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(level)
}

/// Decrements stock by `qty` if at least `qty` is on hand.
///
/// ## Errors
/// - `InsufficientStock` when stock < qty (nothing is changed)
/// - `ProductNotFound` / `GiftNotFound` for an unknown id
pub(crate) async fn reserve(
    conn: &mut SqliteConnection,
    kind: StockKind,
    item_id: &str,
    qty: i64,
) -> DbResult<()> {
    ensure_positive(qty)?;

    let sql = format!(
        "UPDATE {} SET inventory = inventory - ?1, updated_at = ?2 WHERE id = ?3 AND inventory >= ?1",
        kind.table()
    );
    let result = sqlx::query(&sql)
        .bind(qty)
        .bind(timestamp::encode(Utc::now()))
        .bind(item_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 1 {
        debug!(?kind, item_id, qty, "Reserved stock");
        return Ok(());
    }

    match stock_level(conn, kind, item_id).await? {
        None => Err(kind.not_found(item_id).into()),
        Some(available) => Err(CoreError::InsufficientStock {
            item: item_id.to_string(),
            available,
            requested: qty,
        }
        .into()),
    }
}

/// Increments stock by `qty`.
///
/// Callers guarantee at most one restore per reservation (the order and
/// redemption state machines only restore on their terminal transition).
pub(crate) async fn restore(
    conn: &mut SqliteConnection,
    kind: StockKind,
    item_id: &str,
    qty: i64,
) -> DbResult<()> {
    ensure_positive(qty)?;

    let sql = format!(
        "UPDATE {} SET inventory = inventory + ?1, updated_at = ?2 WHERE id = ?3",
        kind.table()
    );
    let result = sqlx::query(&sql)
        .bind(qty)
        .bind(timestamp::encode(Utc::now()))
        .bind(item_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(kind.not_found(item_id).into());
    }

    debug!(?kind, item_id, qty, "Restored stock");
    Ok(())
}

// =============================================================================
// Standalone Ledger
// =============================================================================

/// Stock counters as standalone operations, one transaction each.
#[derive(Debug, Clone)]
pub struct InventoryLedger {
    pool: SqlitePool,
    ctx: EngineContext,
}

impl InventoryLedger {
    pub fn new(pool: SqlitePool, ctx: EngineContext) -> Self {
        InventoryLedger { pool, ctx }
    }

    /// Atomically takes `qty` units of stock.
    pub async fn reserve(&self, kind: StockKind, item_id: &str, qty: i64) -> DbResult<()> {
        self.ctx
            .retry
            .run("inventory.reserve", || async move {
                let mut tx = begin_write(&self.pool).await?;
                reserve(&mut tx, kind, item_id, qty).await?;
                tx.commit().await?;
                Ok(())
            })
            .await
    }

    /// Puts `qty` units back.
    pub async fn restore(&self, kind: StockKind, item_id: &str, qty: i64) -> DbResult<()> {
        self.ctx
            .retry
            .run("inventory.restore", || async move {
                let mut tx = begin_write(&self.pool).await?;
                restore(&mut tx, kind, item_id, qty).await?;
                tx.commit().await?;
                Ok(())
            })
            .await?;
        info!(?kind, item_id, qty, "Stock restored");
        Ok(())
    }

    /// Current stock level.
    pub async fn available(&self, kind: StockKind, item_id: &str) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        stock_level(&mut conn, kind, item_id)
            .await?
            .ok_or_else(|| DbError::Domain(kind.not_found(item_id)))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{file_db, seed_gift, seed_product, test_db};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reserve_and_restore() {
        let db = test_db().await;
        let product = seed_product(&db, "Lychee Mint", 1500, 5).await;
        let ledger = db.inventory();

        ledger.reserve(StockKind::Product, &product.id, 3).await.unwrap();
        assert_eq!(ledger.available(StockKind::Product, &product.id).await.unwrap(), 2);

        ledger.restore(StockKind::Product, &product.id, 3).await.unwrap();
        assert_eq!(ledger.available(StockKind::Product, &product.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_reserve_insufficient_leaves_stock_untouched() {
        let db = test_db().await;
        let product = seed_product(&db, "Lychee Mint", 1500, 2).await;
        let ledger = db.inventory();

        let err = ledger.reserve(StockKind::Product, &product.id, 3).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { available: 2, requested: 3, .. })
        ));
        assert_eq!(ledger.available(StockKind::Product, &product.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reserve_exact_stock_reaches_zero() {
        let db = test_db().await;
        let gift = seed_gift(&db, "Tote Bag", 1).await;
        let ledger = db.inventory();

        ledger.reserve(StockKind::Gift, &gift.id, 1).await.unwrap();
        assert_eq!(ledger.available(StockKind::Gift, &gift.id).await.unwrap(), 0);
        assert!(ledger.reserve(StockKind::Gift, &gift.id, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_items_and_bad_quantities() {
        let db = test_db().await;
        let ledger = db.inventory();

        assert!(matches!(
            ledger.reserve(StockKind::Product, "missing", 1).await,
            Err(DbError::Domain(CoreError::ProductNotFound(_)))
        ));
        assert!(matches!(
            ledger.restore(StockKind::Gift, "missing", 1).await,
            Err(DbError::Domain(CoreError::GiftNotFound(_)))
        ));
        assert!(matches!(
            ledger.reserve(StockKind::Product, "missing", 0).await,
            Err(DbError::Domain(CoreError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reserves_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir, 8).await;
        let product = seed_product(&db, "Limited Tin", 900, 5).await;
        let ledger = Arc::new(db.inventory());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = Arc::clone(&ledger);
            let id = product.id.clone();
            handles.push(tokio::spawn(async move {
                ledger.reserve(StockKind::Product, &id, 1).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(DbError::Domain(CoreError::InsufficientStock { .. })) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(successes, 5);
        assert_eq!(ledger.available(StockKind::Product, &product.id).await.unwrap(), 0);
    }
}
