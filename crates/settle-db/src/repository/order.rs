//! # Order Repository
//!
//! The order state machine and its side effects on stock and usage
//! ledgers.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order Lifecycle                                   │
//! │                                                                         │
//! │  1. CREATE (one transaction)                                           │
//! │     └── normalize cart → price → resolve discount                      │
//! │     └── reserve every line (any failure rolls back all of them)        │
//! │     └── insert order + items, order_usage_count + 1                    │
//! │     └── COMMIT, then notify OrderPlaced                                │
//! │                                                                         │
//! │  2. ADVANCE (admin)                                                    │
//! │     └── PROCESSING → CONFIRMED → SENT, metadata only                   │
//! │                                                                         │
//! │  3. COMPLETE (admin, or auto-complete sweep)                           │
//! │     └── guarded completed_usage_count + 1 on code and promotion        │
//! │     └── stamp completed_at                                             │
//! │                                                                         │
//! │  4. CANCEL (admin, from any non-terminal status)                       │
//! │     └── restore every line's reservation                               │
//! │                                                                         │
//! │  Terminal statuses (COMPLETED, CANCELLED) accept no further change,    │
//! │  so a cancelled order can never restore twice.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use settle_core::order::{normalize_cart, plan_transition, price_cart, subtotal, is_stale};
use settle_core::validation::validate_note;
use settle_core::{
    resolve_discount, Actor, CartLine, CoreError, Order, OrderItem, OrderStatus, OrderWithItems,
    TransitionEffect, TransitionMetadata,
};

use crate::error::{DbError, DbResult};
use crate::notify::{deliver, Notification};
use crate::pool::{begin_write, EngineContext};
use crate::repository::inventory::{self, StockKind};
use crate::repository::product::fetch_product;
use crate::repository::user::require_user;
use crate::repository::{audit, discount, timestamp};

/// Orders shown in a user's history.
pub const ORDER_HISTORY_LIMIT: i64 = 20;

pub(crate) const ORDER_COLUMNS: &str = "id, user_id, status, subtotal_cents, promo_code_id, promo_code_discount_cents, \
     promotion_id, promotion_discount_cents, total_cents, currency, courier_name, tracking_number, \
     message, payment_note, created_at, updated_at, completed_at";

const ORDER_ITEM_COLUMNS: &str =
    "id, order_id, product_id, name_snapshot, unit_price_cents, quantity, line_total_cents, created_at";

/// Outcome of an auto-complete sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoCompleteReport {
    pub completed: Vec<String>,
    pub skipped: Vec<SkippedOrder>,
}

/// An order the sweep could not complete, with the refusal message.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedOrder {
    pub order_id: String,
    pub reason: String,
}

// =============================================================================
// Transaction Helpers
// =============================================================================

pub(crate) async fn fetch_order(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
    let order = sqlx::query_as::<_, Order>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(order)
}

pub(crate) async fn fetch_items(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<OrderItem>> {
    let sql = format!("SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = ?1 ORDER BY created_at, id");
    let items = sqlx::query_as::<_, OrderItem>(&sql)
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(items)
}

async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, user_id, status, subtotal_cents,
            promo_code_id, promo_code_discount_cents, promotion_id, promotion_discount_cents,
            total_cents, currency, courier_name, tracking_number, message, payment_note,
            created_at, updated_at, completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
        "#,
    )
    .bind(&order.id)
    .bind(&order.user_id)
    .bind(order.status)
    .bind(order.subtotal_cents)
    .bind(&order.promo_code_id)
    .bind(order.promo_code_discount_cents)
    .bind(&order.promotion_id)
    .bind(order.promotion_discount_cents)
    .bind(order.total_cents)
    .bind(&order.currency)
    .bind(&order.courier_name)
    .bind(&order.tracking_number)
    .bind(&order.message)
    .bind(&order.payment_note)
    .bind(timestamp::encode(order.created_at))
    .bind(timestamp::encode(order.updated_at))
    .bind(timestamp::encode_opt(order.completed_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_item(conn: &mut SqliteConnection, item: &OrderItem) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO order_items (
            id, order_id, product_id, name_snapshot, unit_price_cents, quantity, line_total_cents, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&item.id)
    .bind(&item.order_id)
    .bind(&item.product_id)
    .bind(&item.name_snapshot)
    .bind(item.unit_price_cents)
    .bind(item.quantity)
    .bind(item.line_total_cents)
    .bind(timestamp::encode(item.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Charges the order's discounts against their usage ledgers.
///
/// Fails without charging anything visible to others: the caller's
/// transaction rolls back on error.
async fn charge_usage(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
    if let Some(promo_code_id) = &order.promo_code_id {
        if !discount::charge_promo_code(conn, promo_code_id).await? {
            let code = discount::fetch_promo_code(conn, promo_code_id)
                .await?
                .map(|p| p.code)
                .unwrap_or_else(|| promo_code_id.clone());
            return Err(CoreError::PromoCodeExhausted(code).into());
        }
    }

    if let Some(promotion_id) = &order.promotion_id {
        if !discount::charge_promotion(conn, promotion_id).await? {
            let name = discount::fetch_promotion(conn, promotion_id)
                .await?
                .map(|p| p.name)
                .unwrap_or_else(|| promotion_id.clone());
            return Err(CoreError::PromotionExhausted(name).into());
        }
    }

    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the order state machine.
///
/// ## Usage
/// ```rust,ignore
/// let placed = db.orders()
///     .create_order(&Actor::user(&user_id), &[CartLine::new(&product_id, 2)], Some("save10"), None)
///     .await?;
/// db.orders().transition(&admin, &placed.order.id, OrderStatus::Completed, TransitionMetadata::default()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
    ctx: EngineContext,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool, ctx: EngineContext) -> Self {
        OrderRepository { pool, ctx }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Places an order for the actor.
    ///
    /// ## Errors
    /// - `EmptyCart`, `Validation` for a malformed cart or message
    /// - `ProductNotFound` / `ProductUnavailable`
    /// - `PromoCodeInvalid` / `Expired` / `BelowMinimum` / `Exhausted`
    /// - `OutOfStock` naming the first line that could not be reserved;
    ///   nothing is reserved in that case
    pub async fn create_order(
        &self,
        actor: &Actor,
        lines: &[CartLine],
        promo_code: Option<&str>,
        message: Option<&str>,
    ) -> DbResult<OrderWithItems> {
        let lines = normalize_cart(lines)?;
        let message = validate_note("message", message)?;

        let lines = &lines;
        let message = message.as_deref();
        let placed = self
            .ctx
            .retry
            .run("order.create", || self.try_create_order(actor, lines, promo_code, message))
            .await?;

        info!(
            order_id = %placed.order.id,
            user_id = %placed.order.user_id,
            total_cents = placed.order.total_cents,
            "Order placed"
        );

        deliver(
            self.ctx.notifier.as_ref(),
            Notification::OrderPlaced {
                order_id: placed.order.id.clone(),
                user_id: placed.order.user_id.clone(),
                total_cents: placed.order.total_cents,
            },
        )
        .await;

        Ok(placed)
    }

    async fn try_create_order(
        &self,
        actor: &Actor,
        lines: &[CartLine],
        promo_code: Option<&str>,
        message: Option<&str>,
    ) -> DbResult<OrderWithItems> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;

        require_user(&mut tx, &actor.user_id).await?;

        let mut products = HashMap::with_capacity(lines.len());
        for line in lines {
            if let Some(product) = fetch_product(&mut tx, &line.product_id).await? {
                products.insert(product.id.clone(), product);
            }
        }
        let priced = price_cart(lines, &products)?;
        let subtotal = subtotal(&priced)?;

        let entered = promo_code.map(str::trim).filter(|c| !c.is_empty());
        let found = match entered {
            Some(code) => discount::fetch_promo_code_by_code(&mut tx, code).await?,
            None => None,
        };
        let promotions = discount::fetch_enabled_promotions(&mut tx).await?;
        let breakdown = resolve_discount(subtotal, entered, found.as_ref(), &promotions, now)?;

        for line in &priced {
            inventory::reserve(&mut tx, StockKind::Product, &line.product_id, line.quantity)
                .await
                .map_err(|err| match err {
                    DbError::Domain(CoreError::InsufficientStock { available, requested, .. }) => {
                        DbError::Domain(CoreError::OutOfStock {
                            product_id: line.product_id.clone(),
                            name: line.name.clone(),
                            available,
                            requested,
                        })
                    }
                    other => other,
                })?;
        }

        let order = Order {
            id: Uuid::new_v4().to_string(),
            user_id: actor.user_id.clone(),
            status: OrderStatus::Processing,
            subtotal_cents: breakdown.subtotal_cents,
            promo_code_id: breakdown.promo_code_id.clone(),
            promo_code_discount_cents: breakdown.promo_code_discount_cents,
            promotion_id: breakdown.promotion_id.clone(),
            promotion_discount_cents: breakdown.promotion_discount_cents,
            total_cents: breakdown.total_cents,
            currency: self.ctx.config.currency.clone(),
            courier_name: None,
            tracking_number: None,
            message: message.map(str::to_string),
            payment_note: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        insert_order(&mut tx, &order).await?;

        let mut items = Vec::with_capacity(priced.len());
        for line in &priced {
            let item = OrderItem {
                id: Uuid::new_v4().to_string(),
                order_id: order.id.clone(),
                product_id: line.product_id.clone(),
                name_snapshot: line.name.clone(),
                unit_price_cents: line.unit_price_cents,
                quantity: line.quantity,
                line_total_cents: line.line_total().cents(),
                created_at: now,
            };
            insert_item(&mut tx, &item).await?;
            items.push(item);
        }

        if let Some(promo_code_id) = &order.promo_code_id {
            discount::note_order_placed(&mut tx, promo_code_id).await?;
        }

        tx.commit().await?;

        debug!(
            order_id = %order.id,
            lines = items.len(),
            discount_cents = breakdown.total_discount().cents(),
            "Order persisted"
        );
        Ok(OrderWithItems { order, items })
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Moves an order to `to`, applying the transition's side effects.
    ///
    /// A same-status call on a non-terminal order only updates metadata.
    ///
    /// ## Errors
    /// - `Forbidden` for non-admin actors
    /// - `OrderNotFound`
    /// - `InvalidTransition` from a terminal status (nothing changes)
    /// - `PromoCodeExhausted` / `PromotionExhausted` when completing would
    ///   overrun a usage cap (the order keeps its status)
    pub async fn transition(
        &self,
        actor: &Actor,
        order_id: &str,
        to: OrderStatus,
        metadata: TransitionMetadata,
    ) -> DbResult<Order> {
        actor.require_admin("order.transition")?;
        let metadata = metadata.normalized()?;
        let metadata = &metadata;

        let (order, effect) = self
            .ctx
            .retry
            .run("order.transition", || self.try_transition(actor, order_id, to, metadata))
            .await?;

        if effect != TransitionEffect::MetadataOnly {
            info!(order_id, status = %order.status, ?effect, "Order status changed");
            deliver(
                self.ctx.notifier.as_ref(),
                Notification::OrderStatusChanged {
                    order_id: order.id.clone(),
                    user_id: order.user_id.clone(),
                    status: order.status,
                },
            )
            .await;
        }

        Ok(order)
    }

    async fn try_transition(
        &self,
        actor: &Actor,
        order_id: &str,
        to: OrderStatus,
        metadata: &TransitionMetadata,
    ) -> DbResult<(Order, TransitionEffect)> {
        let mut tx = begin_write(&self.pool).await?;
        let mut order = fetch_order(&mut tx, order_id)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(order_id.to_string()))?;
        let from = order.status;

        let effect = plan_transition(order_id, from, to)?;
        let now = Utc::now();

        match effect {
            TransitionEffect::Complete => {
                if order.uses_discounts() {
                    charge_usage(&mut tx, &order).await?;
                }
                order.completed_at = Some(now);
            }
            TransitionEffect::Cancel => {
                for item in fetch_items(&mut tx, order_id).await? {
                    inventory::restore(&mut tx, StockKind::Product, &item.product_id, item.quantity).await?;
                }
            }
            TransitionEffect::Advance | TransitionEffect::MetadataOnly => {}
        }

        order.status = to;
        order.updated_at = now;
        if metadata.courier_name.is_some() {
            order.courier_name = metadata.courier_name.clone();
        }
        if metadata.tracking_number.is_some() {
            order.tracking_number = metadata.tracking_number.clone();
        }
        if metadata.payment_note.is_some() {
            order.payment_note = metadata.payment_note.clone();
        }

        sqlx::query(
            r#"
            UPDATE orders
            SET status = ?2, courier_name = ?3, tracking_number = ?4, payment_note = ?5,
                updated_at = ?6, completed_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&order.id)
        .bind(order.status)
        .bind(&order.courier_name)
        .bind(&order.tracking_number)
        .bind(&order.payment_note)
        .bind(timestamp::encode(order.updated_at))
        .bind(timestamp::encode_opt(order.completed_at))
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            actor,
            "order.transition",
            order_id,
            json!({ "from": from, "to": to, "metadata": metadata }),
        )
        .await?;
        tx.commit().await?;

        Ok((order, effect))
    }

    /// Cancels an order and restores its stock.
    pub async fn cancel(&self, actor: &Actor, order_id: &str) -> DbResult<Order> {
        self.transition(actor, order_id, OrderStatus::Cancelled, TransitionMetadata::default())
            .await
    }

    // =========================================================================
    // Auto-completion
    // =========================================================================

    /// Non-terminal orders older than `auto_complete_after_days`, oldest
    /// first. Nothing is changed.
    pub async fn preview_auto_complete(&self, actor: &Actor) -> DbResult<Vec<Order>> {
        actor.require_admin("order.auto_complete")?;
        self.stale_orders(Utc::now()).await
    }

    async fn stale_orders(&self, now: DateTime<Utc>) -> DbResult<Vec<Order>> {
        let after_days = self.ctx.config.auto_complete_after_days;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status IN ('PROCESSING', 'CONFIRMED', 'SENT') ORDER BY created_at, id"
        );
        let open = sqlx::query_as::<_, Order>(&sql).fetch_all(&self.pool).await?;

        Ok(open
            .into_iter()
            .filter(|order| is_stale(order, now, after_days))
            .collect())
    }

    /// Completes every stale order through the normal COMPLETED path.
    ///
    /// Business refusals (usage cap reached, order moved on meanwhile) are
    /// reported as skipped; infrastructure failures abort the sweep.
    pub async fn auto_complete(&self, actor: &Actor) -> DbResult<AutoCompleteReport> {
        actor.require_admin("order.auto_complete")?;

        let candidates = self.stale_orders(Utc::now()).await?;
        let mut report = AutoCompleteReport::default();

        for order in candidates {
            match self
                .transition(actor, &order.id, OrderStatus::Completed, TransitionMetadata::default())
                .await
            {
                Ok(_) => report.completed.push(order.id),
                Err(DbError::Domain(err)) => {
                    warn!(order_id = %order.id, error = %err, "Auto-complete skipped order");
                    report.skipped.push(SkippedOrder {
                        order_id: order.id,
                        reason: err.to_string(),
                    });
                }
                Err(other) => return Err(other),
            }
        }

        info!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            "Auto-complete sweep finished"
        );
        Ok(report)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_with_items(&self, order_id: &str) -> DbResult<Option<OrderWithItems>> {
        let mut conn = self.pool.acquire().await?;
        let Some(order) = fetch_order(&mut conn, order_id).await? else {
            return Ok(None);
        };
        let items = fetch_items(&mut conn, order_id).await?;
        Ok(Some(OrderWithItems { order, items }))
    }

    /// A user's most recent orders with their items. Users see their own;
    /// admins anyone's.
    pub async fn history(&self, actor: &Actor, user_id: &str) -> DbResult<Vec<OrderWithItems>> {
        if actor.user_id != user_id {
            actor.require_admin("order.history")?;
        }

        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(user_id)
            .bind(ORDER_HISTORY_LIMIT)
            .fetch_all(&mut *conn)
            .await?;

        let mut history = Vec::with_capacity(orders.len());
        for order in orders {
            let items = fetch_items(&mut conn, &order.id).await?;
            history.push(OrderWithItems { order, items });
        }
        Ok(history)
    }

    /// Admin listing, newest first, optionally filtered by status.
    pub async fn list(&self, actor: &Actor, status: Option<OrderStatus>, limit: i64) -> DbResult<Vec<Order>> {
        actor.require_admin("order.list")?;

        let orders = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE status = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
                );
                sqlx::query_as::<_, Order>(&sql)
                    .bind(status)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id DESC LIMIT ?1");
                sqlx::query_as::<_, Order>(&sql)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(orders)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::discount::{NewPromoCode, NewPromotion};
    use crate::testing::{admin, file_db, seed_product, seed_user, test_db, FailingNotifier, RecordingNotifier};
    use crate::Database;
    use chrono::Duration;
    use settle_core::DiscountType;
    use std::sync::Arc;

    fn code_input(code: &str, discount_type: DiscountType, value: i64, max_usage: Option<i64>) -> NewPromoCode {
        let now = Utc::now();
        NewPromoCode {
            code: code.to_string(),
            description: None,
            discount_type,
            discount_value: value,
            min_order_cents: None,
            start_at: (now - Duration::days(1)).to_rfc3339(),
            end_at: (now + Duration::days(30)).to_rfc3339(),
            max_usage,
        }
    }

    fn promotion_input(name: &str, discount_type: DiscountType, value: i64) -> NewPromotion {
        let now = Utc::now();
        NewPromotion {
            name: name.to_string(),
            description: None,
            discount_type,
            discount_value: value,
            start_at: (now - Duration::days(1)).to_rfc3339(),
            end_at: (now + Duration::days(30)).to_rfc3339(),
            max_usage: None,
        }
    }

    async fn stock(db: &Database, product_id: &str) -> i64 {
        db.inventory().available(StockKind::Product, product_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_order_with_stacked_discounts() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 5000, 10).await;
        db.discounts()
            .create_promo_code(&admin(), code_input("SAVE10", DiscountType::Percentage, 10, None))
            .await
            .unwrap();
        db.discounts()
            .create_promotion(&admin(), promotion_input("Sitewide", DiscountType::Fixed, 500))
            .await
            .unwrap();

        let placed = db
            .orders()
            .create_order(
                &Actor::user(&user.id),
                &[CartLine::new(&product.id, 2)],
                Some("save10"),
                Some("Please gift wrap"),
            )
            .await
            .unwrap();

        let order = &placed.order;
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.subtotal_cents, 10000);
        assert_eq!(order.promo_code_discount_cents, 1000);
        assert_eq!(order.promotion_discount_cents, 500);
        assert_eq!(order.total_cents, 8500);
        assert_eq!(order.currency, "MYR");
        assert_eq!(order.message.as_deref(), Some("Please gift wrap"));
        assert_eq!(placed.items.len(), 1);
        assert_eq!(placed.items[0].unit_price_cents, 5000);
        assert_eq!(stock(&db, &product.id).await, 8);

        let promo = db.discounts().find_code("SAVE10").await.unwrap().unwrap();
        assert_eq!(promo.order_usage_count, 1);
        assert_eq!(promo.completed_usage_count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_lines_are_merged() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 1200, 10).await;

        let placed = db
            .orders()
            .create_order(
                &Actor::user(&user.id),
                &[CartLine::new(&product.id, 2), CartLine::new(&product.id, 3)],
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(placed.items.len(), 1);
        assert_eq!(placed.items[0].quantity, 5);
        assert_eq!(placed.order.total_cents, 6000);
        assert_eq!(stock(&db, &product.id).await, 5);
    }

    #[tokio::test]
    async fn test_out_of_stock_rolls_back_whole_cart() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let plenty = seed_product(&db, "Plenty", 1000, 10).await;
        let scarce = seed_product(&db, "Scarce", 1000, 1).await;

        let err = db
            .orders()
            .create_order(
                &Actor::user(&user.id),
                &[CartLine::new(&plenty.id, 3), CartLine::new(&scarce.id, 2)],
                None,
                None,
            )
            .await
            .unwrap_err();

        match err {
            DbError::Domain(CoreError::OutOfStock { product_id, name, available, requested }) => {
                assert_eq!(product_id, scarce.id);
                assert_eq!(name, "Scarce");
                assert_eq!(available, 1);
                assert_eq!(requested, 2);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(stock(&db, &plenty.id).await, 10);
        assert_eq!(stock(&db, &scarce.id).await, 1);
        assert!(db.orders().history(&admin(), &user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_code_fails_without_reserving() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 1000, 5).await;

        let err = db
            .orders()
            .create_order(&Actor::user(&user.id), &[CartLine::new(&product.id, 1)], Some("NOPE"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::PromoCodeInvalid(_))));
        assert_eq!(stock(&db, &product.id).await, 5);
    }

    #[tokio::test]
    async fn test_empty_cart_and_unknown_user() {
        let db = test_db().await;
        let product = seed_product(&db, "Gift Box", 1000, 5).await;

        assert!(matches!(
            db.orders().create_order(&Actor::user("ghost"), &[], None, None).await,
            Err(DbError::Domain(CoreError::EmptyCart))
        ));
        assert!(matches!(
            db.orders()
                .create_order(&Actor::user("ghost"), &[CartLine::new(&product.id, 1)], None, None)
                .await,
            Err(DbError::Domain(CoreError::UserNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_full_lifecycle_with_metadata_and_notifications() {
        let notifier = Arc::new(RecordingNotifier::default());
        let db = test_db().await.with_notifier(notifier.clone());
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 1000, 5).await;

        let placed = db
            .orders()
            .create_order(&Actor::user(&user.id), &[CartLine::new(&product.id, 1)], None, None)
            .await
            .unwrap();
        let id = placed.order.id.clone();
        let orders = db.orders();

        orders
            .transition(&admin(), &id, OrderStatus::Confirmed, TransitionMetadata {
                payment_note: Some("Bank transfer ref 8812".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        // Same-status update only touches metadata and does not notify
        orders
            .transition(&admin(), &id, OrderStatus::Confirmed, TransitionMetadata {
                courier_name: Some("J&T".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let sent = orders
            .transition(&admin(), &id, OrderStatus::Sent, TransitionMetadata {
                tracking_number: Some("JT123".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(sent.courier_name.as_deref(), Some("J&T"));
        assert_eq!(sent.tracking_number.as_deref(), Some("JT123"));
        assert_eq!(sent.payment_note.as_deref(), Some("Bank transfer ref 8812"));

        let completed = orders
            .transition(&admin(), &id, OrderStatus::Completed, TransitionMetadata::default())
            .await
            .unwrap();
        assert!(completed.completed_at.is_some());

        let err = orders.cancel(&admin(), &id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidTransition { .. })));
        assert_eq!(stock(&db, &product.id).await, 4);

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 4); // placed, confirmed, sent, completed
        assert!(matches!(sent[0], Notification::OrderPlaced { .. }));
        assert!(matches!(
            sent[3],
            Notification::OrderStatusChanged { status: OrderStatus::Completed, .. }
        ));
        assert_eq!(db.audit().for_target(&id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_restores_exactly_once() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let a = seed_product(&db, "A", 1000, 5).await;
        let b = seed_product(&db, "B", 1000, 5).await;

        let placed = db
            .orders()
            .create_order(
                &Actor::user(&user.id),
                &[CartLine::new(&a.id, 2), CartLine::new(&b.id, 3)],
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(stock(&db, &a.id).await, 3);
        assert_eq!(stock(&db, &b.id).await, 2);

        db.orders().cancel(&admin(), &placed.order.id).await.unwrap();
        assert_eq!(stock(&db, &a.id).await, 5);
        assert_eq!(stock(&db, &b.id).await, 5);

        let err = db.orders().cancel(&admin(), &placed.order.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidTransition { .. })));
        assert_eq!(stock(&db, &a.id).await, 5);
        assert_eq!(stock(&db, &b.id).await, 5);
    }

    #[tokio::test]
    async fn test_transition_requires_admin() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 1000, 5).await;
        let placed = db
            .orders()
            .create_order(&Actor::user(&user.id), &[CartLine::new(&product.id, 1)], None, None)
            .await
            .unwrap();

        let err = db
            .orders()
            .cancel(&Actor::user(&user.id), &placed.order.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Forbidden { .. })));
        assert_eq!(stock(&db, &product.id).await, 4);
    }

    #[tokio::test]
    async fn test_completion_refused_when_code_exhausted() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 1000, 10).await;
        db.discounts()
            .create_promo_code(&admin(), code_input("ONCE", DiscountType::Fixed, 100, Some(1)))
            .await
            .unwrap();

        let actor = Actor::user(&user.id);
        let first = db
            .orders()
            .create_order(&actor, &[CartLine::new(&product.id, 1)], Some("ONCE"), None)
            .await
            .unwrap();
        let second = db
            .orders()
            .create_order(&actor, &[CartLine::new(&product.id, 1)], Some("ONCE"), None)
            .await
            .unwrap();

        db.orders()
            .transition(&admin(), &first.order.id, OrderStatus::Completed, TransitionMetadata::default())
            .await
            .unwrap();
        let err = db
            .orders()
            .transition(&admin(), &second.order.id, OrderStatus::Completed, TransitionMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::PromoCodeExhausted(ref code)) if code == "ONCE"));

        let still_open = db.orders().get_with_items(&second.order.id).await.unwrap().unwrap();
        assert_eq!(still_open.order.status, OrderStatus::Processing);

        // A third checkout with the exhausted code is refused up front
        let err = db
            .orders()
            .create_order(&actor, &[CartLine::new(&product.id, 1)], Some("ONCE"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::PromoCodeExhausted(_))));
    }

    #[tokio::test]
    async fn test_auto_complete_sweep() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 1000, 10).await;
        let actor = Actor::user(&user.id);

        let old = db
            .orders()
            .create_order(&actor, &[CartLine::new(&product.id, 1)], None, None)
            .await
            .unwrap();
        let fresh = db
            .orders()
            .create_order(&actor, &[CartLine::new(&product.id, 1)], None, None)
            .await
            .unwrap();

        sqlx::query("UPDATE orders SET created_at = ?2 WHERE id = ?1")
            .bind(&old.order.id)
            .bind(timestamp::encode(Utc::now() - Duration::days(15)))
            .execute(db.pool())
            .await
            .unwrap();

        let preview = db.orders().preview_auto_complete(&admin()).await.unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].id, old.order.id);

        let report = db.orders().auto_complete(&admin()).await.unwrap();
        assert_eq!(report.completed, vec![old.order.id.clone()]);
        assert!(report.skipped.is_empty());

        let fresh = db.orders().get_with_items(&fresh.order.id).await.unwrap().unwrap();
        assert_eq!(fresh.order.status, OrderStatus::Processing);
        assert!(db.orders().preview_auto_complete(&admin()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_private_and_limited() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let other = seed_user(&db, "ali@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 100, 100).await;
        let actor = Actor::user(&user.id);

        for _ in 0..(ORDER_HISTORY_LIMIT + 2) {
            db.orders()
                .create_order(&actor, &[CartLine::new(&product.id, 1)], None, None)
                .await
                .unwrap();
        }

        let history = db.orders().history(&actor, &user.id).await.unwrap();
        assert_eq!(history.len() as i64, ORDER_HISTORY_LIMIT);
        assert!(history.iter().all(|o| o.items.len() == 1));

        assert!(db.orders().history(&Actor::user(&other.id), &user.id).await.is_err());
        assert_eq!(
            db.orders()
                .list(&admin(), Some(OrderStatus::Processing), 100)
                .await
                .unwrap()
                .len() as i64,
            ORDER_HISTORY_LIMIT + 2
        );
    }

    #[tokio::test]
    async fn test_history_sorts_on_fixed_width_timestamps() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 100, 100).await;
        let actor = Actor::user(&user.id);

        let mut placed = Vec::new();
        for _ in 0..3 {
            let order = db
                .orders()
                .create_order(&actor, &[CartLine::new(&product.id, 1)], None, None)
                .await
                .unwrap();
            placed.push(order.order.id);
        }

        let stored: Vec<String> = sqlx::query_scalar("SELECT created_at FROM orders")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert!(stored.iter().all(|at| at.len() == 27 && at.ends_with('Z')));

        // Same second, whole vs fractional: the fractional one is newer
        let second = Utc::now() - Duration::days(1);
        let second = second - Duration::nanoseconds(second.timestamp_subsec_nanos() as i64);
        for (id, at) in [
            (&placed[0], second + Duration::milliseconds(500)),
            (&placed[1], second),
            (&placed[2], second + Duration::microseconds(120_001)),
        ] {
            sqlx::query("UPDATE orders SET created_at = ?2 WHERE id = ?1")
                .bind(id)
                .bind(timestamp::encode(at))
                .execute(db.pool())
                .await
                .unwrap();
        }

        let history = db.orders().history(&actor, &user.id).await.unwrap();
        let ids: Vec<&str> = history.iter().map(|o| o.order.id.as_str()).collect();
        assert_eq!(ids, vec![placed[0].as_str(), placed[2].as_str(), placed[1].as_str()]);
    }

    #[tokio::test]
    async fn test_overflowing_cart_is_refused_without_reserving() {
        let db = test_db().await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gold Bar", i64::MAX / 2, 10).await;

        let err = db
            .orders()
            .create_order(&Actor::user(&user.id), &[CartLine::new(&product.id, 3)], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
        assert_eq!(stock(&db, &product.id).await, 10);
    }

    #[tokio::test]
    async fn test_failing_notifier_does_not_fail_order() {
        let db = test_db().await.with_notifier(Arc::new(FailingNotifier));
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 1000, 5).await;

        let placed = db
            .orders()
            .create_order(&Actor::user(&user.id), &[CartLine::new(&product.id, 1)], None, None)
            .await
            .unwrap();
        db.orders().cancel(&admin(), &placed.order.id).await.unwrap();
        assert_eq!(stock(&db, &product.id).await, 5);
    }

    #[tokio::test]
    async fn test_concurrent_completions_respect_usage_limit() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir, 8).await;
        let user = seed_user(&db, "siti@example.com", 0).await;
        let product = seed_product(&db, "Gift Box", 1000, 50).await;
        db.discounts()
            .create_promo_code(&admin(), code_input("LIMIT3", DiscountType::Fixed, 100, Some(3)))
            .await
            .unwrap();

        let actor = Actor::user(&user.id);
        let mut order_ids = Vec::new();
        for _ in 0..10 {
            let placed = db
                .orders()
                .create_order(&actor, &[CartLine::new(&product.id, 1)], Some("LIMIT3"), None)
                .await
                .unwrap();
            order_ids.push(placed.order.id);
        }

        let orders = Arc::new(db.orders());
        let mut handles = Vec::new();
        for id in order_ids {
            let orders = Arc::clone(&orders);
            handles.push(tokio::spawn(async move {
                orders
                    .transition(&admin(), &id, OrderStatus::Completed, TransitionMetadata::default())
                    .await
            }));
        }

        let mut completed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => completed += 1,
                Err(DbError::Domain(CoreError::PromoCodeExhausted(_))) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(completed, 3);

        let promo = db.discounts().find_code("LIMIT3").await.unwrap().unwrap();
        assert_eq!(promo.completed_usage_count, 3);

        let completed_orders = db
            .orders()
            .list(&admin(), Some(OrderStatus::Completed), 100)
            .await
            .unwrap();
        assert_eq!(completed_orders.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir, 8).await;
        let product = seed_product(&db, "Last Units", 1000, 4).await;

        let mut users = Vec::new();
        for i in 0..12 {
            users.push(seed_user(&db, &format!("buyer{i}@example.com"), 0).await.id);
        }

        let orders = Arc::new(db.orders());
        let mut handles = Vec::new();
        for user_id in users {
            let orders = Arc::clone(&orders);
            let product_id = product.id.clone();
            handles.push(tokio::spawn(async move {
                orders
                    .create_order(&Actor::user(user_id), &[CartLine::new(product_id, 1)], None, None)
                    .await
            }));
        }

        let mut placed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => placed += 1,
                Err(DbError::Domain(CoreError::OutOfStock { .. })) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(placed, 4);
        assert_eq!(stock(&db, &product.id).await, 0);
    }
}
