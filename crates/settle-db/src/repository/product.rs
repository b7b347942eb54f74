//! # Product Repository
//!
//! Catalog administration for products.
//!
//! ## Key Operations
//! - Create / update products (admin, audited)
//! - Featured flag with a system-wide cap
//! - Direct stock corrections
//!
//! ## Featured Cap
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    set_featured(product, true)                          │
//! │                                                                         │
//! │  UPDATE products SET is_featured = 1                                   │
//! │   WHERE id = ?                                                         │
//! │     AND is_featured = 0                                                │
//! │     AND (SELECT COUNT(*) FROM products WHERE is_featured = 1) < max    │
//! │       │                                                                 │
//! │       ├── 1 row  ──► featured                                          │
//! │       └── 0 rows ──► already featured? ok : FeaturedLimitReached       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock movements caused by orders go through the inventory ledger, not
//! through this repository.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use settle_core::validation::{validate_inventory, validate_item_name, validate_price_cents};
use settle_core::{Actor, CoreError, Product};

use crate::error::DbResult;
use crate::pool::{begin_write, EngineContext};
use crate::repository::{audit, timestamp};

const PRODUCT_COLUMNS: &str =
    "id, name, price_cents, inventory, is_active, is_featured, created_at, updated_at";

/// Input for a new product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub price_cents: i64,
    pub inventory: i64,
    pub is_active: bool,
}

/// Partial product edit. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub price_cents: Option<i64>,
    pub is_active: Option<bool>,
}

/// Loads one product on `conn`.
pub(crate) async fn fetch_product(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
    let product = sqlx::query_as::<_, Product>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(product)
}

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let product = db.products().create(&admin, NewProduct { .. }).await?;
/// db.products().set_featured(&admin, &product.id, true).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
    ctx: EngineContext,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool, ctx: EngineContext) -> Self {
        ProductRepository { pool, ctx }
    }

    /// Gets a product by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_product(&mut conn, id).await
    }

    /// Products currently for sale, by name.
    pub async fn list_active(&self) -> DbResult<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY name, id");
        let products = sqlx::query_as::<_, Product>(&sql).fetch_all(&self.pool).await?;
        Ok(products)
    }

    pub async fn list_featured(&self) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE is_featured = 1 AND is_active = 1 ORDER BY updated_at DESC"
        );
        let products = sqlx::query_as::<_, Product>(&sql).fetch_all(&self.pool).await?;
        Ok(products)
    }

    /// Creates a product.
    ///
    /// ## Errors
    /// - `Forbidden` for non-admin actors
    /// - `Validation` for a blank/long name, negative price or stock
    pub async fn create(&self, actor: &Actor, input: NewProduct) -> DbResult<Product> {
        actor.require_admin("product.create")?;
        let name = validate_item_name(&input.name)?;
        validate_price_cents(input.price_cents)?;
        validate_inventory(input.inventory)?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            name,
            price_cents: input.price_cents,
            inventory: input.inventory,
            is_active: input.is_active,
            is_featured: false,
            created_at: now,
            updated_at: now,
        };

        let mut tx = begin_write(&self.pool).await?;
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, inventory, is_active, is_featured, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.inventory)
        .bind(product.is_active)
        .bind(product.is_featured)
        .bind(timestamp::encode(product.created_at))
        .bind(timestamp::encode(product.updated_at))
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            actor,
            "product.create",
            &product.id,
            json!({ "name": product.name, "price_cents": product.price_cents, "inventory": product.inventory }),
        )
        .await?;
        tx.commit().await?;

        info!(id = %product.id, name = %product.name, "Product created");
        Ok(product)
    }

    /// Applies a partial edit.
    ///
    /// Price changes never touch existing orders; order lines keep their
    /// snapshot.
    pub async fn update(&self, actor: &Actor, id: &str, changes: ProductUpdate) -> DbResult<Product> {
        actor.require_admin("product.update")?;
        let name = changes.name.as_deref().map(validate_item_name).transpose()?;
        if let Some(price_cents) = changes.price_cents {
            validate_price_cents(price_cents)?;
        }

        let mut tx = begin_write(&self.pool).await?;
        let mut product = fetch_product(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(id.to_string()))?;

        if let Some(name) = name {
            product.name = name;
        }
        if let Some(price_cents) = changes.price_cents {
            product.price_cents = price_cents;
        }
        if let Some(is_active) = changes.is_active {
            product.is_active = is_active;
        }
        product.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE products
            SET name = ?2, price_cents = ?3, is_active = ?4, updated_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.is_active)
        .bind(timestamp::encode(product.updated_at))
        .execute(&mut *tx)
        .await?;

        audit::record(&mut tx, actor, "product.update", id, serde_json::to_value(&changes)?).await?;
        tx.commit().await?;

        debug!(id, "Product updated");
        Ok(product)
    }

    /// Features or un-features a product.
    ///
    /// ## Errors
    /// - `FeaturedLimitReached` when the cap is already used up
    pub async fn set_featured(&self, actor: &Actor, id: &str, featured: bool) -> DbResult<()> {
        actor.require_admin("product.set_featured")?;
        let max = self.ctx.config.max_featured_products;

        let mut tx = begin_write(&self.pool).await?;
        let product = fetch_product(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(id.to_string()))?;

        if product.is_featured == featured {
            debug!(id, featured, "Featured flag unchanged");
            return Ok(());
        }

        let now = Utc::now();
        let result = if featured {
            sqlx::query(
                r#"
                UPDATE products SET is_featured = 1, updated_at = ?2
                WHERE id = ?1
                  AND is_featured = 0
                  AND (SELECT COUNT(*) FROM products WHERE is_featured = 1) < ?3
                "#,
            )
            .bind(id)
            .bind(timestamp::encode(now))
            .bind(max)
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query("UPDATE products SET is_featured = 0, updated_at = ?2 WHERE id = ?1")
                .bind(id)
                .bind(timestamp::encode(now))
                .execute(&mut *tx)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(CoreError::FeaturedLimitReached { max }.into());
        }

        audit::record(&mut tx, actor, "product.set_featured", id, json!({ "featured": featured })).await?;
        tx.commit().await?;

        info!(id, featured, "Featured flag changed");
        Ok(())
    }

    /// Overwrites the stock counter (stock take, restock).
    pub async fn set_stock(&self, actor: &Actor, id: &str, inventory: i64) -> DbResult<()> {
        actor.require_admin("product.set_stock")?;
        validate_inventory(inventory)?;

        let mut tx = begin_write(&self.pool).await?;
        let previous: Option<i64> = sqlx::query_scalar("SELECT inventory FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let previous = previous.ok_or_else(|| CoreError::ProductNotFound(id.to_string()))?;

        sqlx::query("UPDATE products SET inventory = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(inventory)
            .bind(timestamp::encode(Utc::now()))
            .execute(&mut *tx)
            .await?;

        audit::record(
            &mut tx,
            actor,
            "product.set_stock",
            id,
            json!({ "from": previous, "to": inventory }),
        )
        .await?;
        tx.commit().await?;

        info!(id, from = previous, to = inventory, "Stock set");
        Ok(())
    }

    /// Counts active products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::testing::{admin, seed_product, test_db};

    fn new_product(name: &str) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            price_cents: 2590,
            inventory: 12,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = test_db().await;
        let created = db.products().create(&admin(), new_product("  Kopi O  ")).await.unwrap();
        assert_eq!(created.name, "Kopi O");

        let loaded = db.products().get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.price_cents, 2590);
        assert_eq!(loaded.inventory, 12);
        assert_eq!(db.products().count().await.unwrap(), 1);
        assert_eq!(db.audit().for_target(&created.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_requires_admin() {
        let db = test_db().await;
        let err = db
            .products()
            .create(&Actor::user("u-1"), new_product("Kopi O"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Forbidden { .. })));
    }

    #[tokio::test]
    async fn test_create_rejects_negative_price() {
        let db = test_db().await;
        let mut input = new_product("Kopi O");
        input.price_cents = -1;
        let err = db.products().create(&admin(), input).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_price_above_ceiling() {
        let db = test_db().await;
        let mut input = new_product("Gold Bar");
        input.price_cents = i64::MAX / 2;
        let err = db.products().create(&admin(), input).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));

        let mut input = new_product("Gold Bar");
        input.price_cents = settle_core::MAX_PRICE_CENTS;
        assert!(db.products().create(&admin(), input).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_partial() {
        let db = test_db().await;
        let product = seed_product(&db, "Teh Tarik", 450, 3).await;

        let updated = db
            .products()
            .update(
                &admin(),
                &product.id,
                ProductUpdate {
                    price_cents: Some(500),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Teh Tarik");
        assert_eq!(updated.price_cents, 500);
        assert!(!updated.is_active);
        assert!(db.products().list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_featured_cap() {
        let db = test_db().await;
        let repo = db.products();
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(seed_product(&db, &format!("Blend {i}"), 1000, 1).await.id);
        }

        for id in &ids[..3] {
            repo.set_featured(&admin(), id, true).await.unwrap();
        }
        let err = repo.set_featured(&admin(), &ids[3], true).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::FeaturedLimitReached { max: 3 })));

        // Re-featuring an already featured product is a no-op
        repo.set_featured(&admin(), &ids[0], true).await.unwrap();

        repo.set_featured(&admin(), &ids[0], false).await.unwrap();
        repo.set_featured(&admin(), &ids[3], true).await.unwrap();
        assert_eq!(repo.list_featured().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_set_stock() {
        let db = test_db().await;
        let product = seed_product(&db, "Teh Tarik", 450, 3).await;

        db.products().set_stock(&admin(), &product.id, 40).await.unwrap();
        let loaded = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(loaded.inventory, 40);

        assert!(db.products().set_stock(&admin(), &product.id, -1).await.is_err());
        assert!(matches!(
            db.products().set_stock(&admin(), "missing", 1).await,
            Err(DbError::Domain(CoreError::ProductNotFound(_)))
        ));
    }
}
