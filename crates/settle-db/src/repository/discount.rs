//! # Discount Repository
//!
//! Promo codes, sitewide promotions and their usage ledgers.
//!
//! ## Usage Ledger
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 completed_usage_count lifecycle                         │
//! │                                                                         │
//! │  order placed with code     ──► order_usage_count + 1  (informational) │
//! │  order reaches COMPLETED    ──► completed_usage_count + 1, guarded:    │
//! │                                                                         │
//! │      UPDATE promo_codes                                                │
//! │         SET completed_usage_count = completed_usage_count + 1          │
//! │       WHERE id = ?                                                     │
//! │         AND (max_usage IS NULL OR completed_usage_count < max_usage)   │
//! │                                                                         │
//! │  order CANCELLED            ──► nothing (never counted)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Window bounds are entered in business-local time (GMT+8) and stored as
//! UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use settle_core::time::parse_business_datetime;
use settle_core::validation::{
    normalize_promo_code, validate_discount_value, validate_max_usage, validate_min_order,
    validate_note, validate_promotion_name, validate_window,
};
use settle_core::{Actor, DiscountType, PromoCode, Promotion, ValidationError};

use crate::error::{DbError, DbResult};
use crate::pool::begin_write;
use crate::repository::{audit, timestamp};

const PROMO_CODE_COLUMNS: &str = "id, code, description, discount_type, discount_value, min_order_cents, \
     start_at, end_at, max_usage, completed_usage_count, order_usage_count, is_active, created_at, updated_at";

const PROMOTION_COLUMNS: &str = "id, name, description, discount_type, discount_value, start_at, end_at, \
     max_usage, completed_usage_count, is_active, created_at, updated_at";

// =============================================================================
// Inputs and Views
// =============================================================================

/// Admin input for a promo code. Dates are business-local unless they
/// carry an offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPromoCode {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_order_cents: Option<i64>,
    pub start_at: String,
    pub end_at: String,
    pub max_usage: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPromotion {
    pub name: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub start_at: String,
    pub end_at: String,
    pub max_usage: Option<i64>,
}

/// A promo code with its order analytics.
#[derive(Debug, Clone, Serialize)]
pub struct PromoCodeMetrics {
    pub promo_code: PromoCode,
    /// Orders placed with the code, any status.
    pub orders: i64,
    pub discount_given_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionMetrics {
    pub promotion: Promotion,
    pub orders: i64,
    pub revenue_cents: i64,
    pub discount_saved_cents: i64,
}

#[derive(sqlx::FromRow)]
struct OrderAggregate {
    orders: i64,
    total_cents: i64,
    discount_cents: i64,
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Case-insensitive code lookup.
pub(crate) async fn fetch_promo_code_by_code(
    conn: &mut SqliteConnection,
    code: &str,
) -> DbResult<Option<PromoCode>> {
    let sql = format!("SELECT {PROMO_CODE_COLUMNS} FROM promo_codes WHERE code = ?1");
    let promo = sqlx::query_as::<_, PromoCode>(&sql)
        .bind(code.trim().to_uppercase())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(promo)
}

pub(crate) async fn fetch_promo_code(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<PromoCode>> {
    let sql = format!("SELECT {PROMO_CODE_COLUMNS} FROM promo_codes WHERE id = ?1");
    let promo = sqlx::query_as::<_, PromoCode>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(promo)
}

pub(crate) async fn fetch_promotion(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Promotion>> {
    let sql = format!("SELECT {PROMOTION_COLUMNS} FROM promotions WHERE id = ?1");
    let promotion = sqlx::query_as::<_, Promotion>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(promotion)
}

/// Every switched-on promotion. Window and usage filtering happens in
/// `settle_core::discount::select_active_promotion`.
pub(crate) async fn fetch_enabled_promotions(conn: &mut SqliteConnection) -> DbResult<Vec<Promotion>> {
    let sql = format!("SELECT {PROMOTION_COLUMNS} FROM promotions WHERE is_active = 1");
    let promotions = sqlx::query_as::<_, Promotion>(&sql)
        .fetch_all(&mut *conn)
        .await?;
    Ok(promotions)
}

/// Counts an order placed with the code.
pub(crate) async fn note_order_placed(conn: &mut SqliteConnection, promo_code_id: &str) -> DbResult<()> {
    sqlx::query(
        "UPDATE promo_codes SET order_usage_count = order_usage_count + 1, updated_at = ?2 WHERE id = ?1",
    )
    .bind(promo_code_id)
    .bind(timestamp::encode(Utc::now()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Charges one completed use against the code.
///
/// ## Returns
/// `false` when the code already reached `max_usage` (nothing changed).
pub(crate) async fn charge_promo_code(conn: &mut SqliteConnection, promo_code_id: &str) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE promo_codes
        SET completed_usage_count = completed_usage_count + 1, updated_at = ?2
        WHERE id = ?1
          AND (max_usage IS NULL OR completed_usage_count < max_usage)
        "#,
    )
    .bind(promo_code_id)
    .bind(timestamp::encode(Utc::now()))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Charges one completed use against the promotion.
pub(crate) async fn charge_promotion(conn: &mut SqliteConnection, promotion_id: &str) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE promotions
        SET completed_usage_count = completed_usage_count + 1, updated_at = ?2
        WHERE id = ?1
          AND (max_usage IS NULL OR completed_usage_count < max_usage)
        "#,
    )
    .bind(promotion_id)
    .bind(timestamp::encode(Utc::now()))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

fn parse_window(start_at: &str, end_at: &str) -> DbResult<(DateTime<Utc>, DateTime<Utc>)> {
    let start_at = parse_business_datetime(start_at)?;
    let end_at = parse_business_datetime(end_at)?;
    validate_window(start_at, end_at)?;
    Ok((start_at, end_at))
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct DiscountRepository {
    pool: SqlitePool,
}

impl DiscountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        DiscountRepository { pool }
    }

    /// Looks a code up case-insensitively.
    pub async fn find_code(&self, code: &str) -> DbResult<Option<PromoCode>> {
        let mut conn = self.pool.acquire().await?;
        fetch_promo_code_by_code(&mut conn, code).await
    }

    pub async fn get_promo_code(&self, id: &str) -> DbResult<Option<PromoCode>> {
        let mut conn = self.pool.acquire().await?;
        fetch_promo_code(&mut conn, id).await
    }

    pub async fn get_promotion(&self, id: &str) -> DbResult<Option<Promotion>> {
        let mut conn = self.pool.acquire().await?;
        fetch_promotion(&mut conn, id).await
    }

    /// The promotion that would apply to a checkout right now.
    pub async fn active_promotion(&self) -> DbResult<Option<Promotion>> {
        let mut conn = self.pool.acquire().await?;
        let promotions = fetch_enabled_promotions(&mut conn).await?;
        Ok(settle_core::discount::select_active_promotion(&promotions, Utc::now()).cloned())
    }

    /// Creates a promo code.
    ///
    /// ## Errors
    /// - `Validation(Duplicate)` when the code already exists (any case)
    /// - `Validation` for a bad code, window, value or cap
    pub async fn create_promo_code(&self, actor: &Actor, input: NewPromoCode) -> DbResult<PromoCode> {
        actor.require_admin("promo_code.create")?;

        let code = normalize_promo_code(&input.code)?;
        let discount_value = validate_discount_value(input.discount_type, input.discount_value)?;
        validate_min_order(input.min_order_cents)?;
        validate_max_usage(input.max_usage)?;
        let (start_at, end_at) = parse_window(&input.start_at, &input.end_at)?;
        let description = validate_note("description", input.description.as_deref())?;

        let now = Utc::now();
        let promo = PromoCode {
            id: Uuid::new_v4().to_string(),
            code,
            description,
            discount_type: input.discount_type,
            discount_value,
            min_order_cents: input.min_order_cents,
            start_at,
            end_at,
            max_usage: input.max_usage,
            completed_usage_count: 0,
            order_usage_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let mut tx = begin_write(&self.pool).await?;
        if fetch_promo_code_by_code(&mut tx, &promo.code).await?.is_some() {
            return Err(ValidationError::Duplicate {
                field: "promo code".to_string(),
                value: promo.code,
            }
            .into());
        }

        sqlx::query(
            r#"
            INSERT INTO promo_codes (
                id, code, description, discount_type, discount_value, min_order_cents,
                start_at, end_at, max_usage, completed_usage_count, order_usage_count,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&promo.id)
        .bind(&promo.code)
        .bind(&promo.description)
        .bind(promo.discount_type)
        .bind(promo.discount_value)
        .bind(promo.min_order_cents)
        .bind(timestamp::encode(promo.start_at))
        .bind(timestamp::encode(promo.end_at))
        .bind(promo.max_usage)
        .bind(promo.completed_usage_count)
        .bind(promo.order_usage_count)
        .bind(promo.is_active)
        .bind(timestamp::encode(promo.created_at))
        .bind(timestamp::encode(promo.updated_at))
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            actor,
            "promo_code.create",
            &promo.id,
            json!({
                "code": promo.code,
                "discount_type": promo.discount_type,
                "discount_value": promo.discount_value,
                "max_usage": promo.max_usage,
            }),
        )
        .await?;
        tx.commit().await?;

        info!(id = %promo.id, code = %promo.code, "Promo code created");
        Ok(promo)
    }

    /// Creates a sitewide promotion.
    pub async fn create_promotion(&self, actor: &Actor, input: NewPromotion) -> DbResult<Promotion> {
        actor.require_admin("promotion.create")?;

        let name = validate_promotion_name(&input.name)?;
        let discount_value = validate_discount_value(input.discount_type, input.discount_value)?;
        validate_max_usage(input.max_usage)?;
        let (start_at, end_at) = parse_window(&input.start_at, &input.end_at)?;
        let description = validate_note("description", input.description.as_deref())?;

        let now = Utc::now();
        let promotion = Promotion {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            discount_type: input.discount_type,
            discount_value,
            start_at,
            end_at,
            max_usage: input.max_usage,
            completed_usage_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let mut tx = begin_write(&self.pool).await?;
        sqlx::query(
            r#"
            INSERT INTO promotions (
                id, name, description, discount_type, discount_value,
                start_at, end_at, max_usage, completed_usage_count,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&promotion.id)
        .bind(&promotion.name)
        .bind(&promotion.description)
        .bind(promotion.discount_type)
        .bind(promotion.discount_value)
        .bind(timestamp::encode(promotion.start_at))
        .bind(timestamp::encode(promotion.end_at))
        .bind(promotion.max_usage)
        .bind(promotion.completed_usage_count)
        .bind(promotion.is_active)
        .bind(timestamp::encode(promotion.created_at))
        .bind(timestamp::encode(promotion.updated_at))
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            actor,
            "promotion.create",
            &promotion.id,
            json!({
                "name": promotion.name,
                "discount_type": promotion.discount_type,
                "discount_value": promotion.discount_value,
                "start_at": promotion.start_at,
                "end_at": promotion.end_at,
            }),
        )
        .await?;
        tx.commit().await?;

        info!(id = %promotion.id, name = %promotion.name, "Promotion created");
        Ok(promotion)
    }

    /// Switches a promo code on or off.
    pub async fn set_promo_code_active(&self, actor: &Actor, id: &str, active: bool) -> DbResult<()> {
        self.set_active(actor, "promo_codes", "promo_code.set_active", "Promo code", id, active)
            .await
    }

    /// Switches a promotion on or off.
    pub async fn set_promotion_active(&self, actor: &Actor, id: &str, active: bool) -> DbResult<()> {
        self.set_active(actor, "promotions", "promotion.set_active", "Promotion", id, active)
            .await
    }

    async fn set_active(
        &self,
        actor: &Actor,
        table: &str,
        action: &str,
        entity: &str,
        id: &str,
        active: bool,
    ) -> DbResult<()> {
        actor.require_admin(action)?;

        let mut tx = begin_write(&self.pool).await?;
        let sql = format!("UPDATE {table} SET is_active = ?2, updated_at = ?3 WHERE id = ?1");
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(active)
            .bind(timestamp::encode(Utc::now()))
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(entity, id));
        }

        audit::record(&mut tx, actor, action, id, json!({ "active": active })).await?;
        tx.commit().await?;

        info!(entity, id, active, "Discount toggled");
        Ok(())
    }

    /// All promo codes, newest first, with order analytics.
    pub async fn list_promo_codes(&self, actor: &Actor) -> DbResult<Vec<PromoCodeMetrics>> {
        actor.require_admin("promo_code.list")?;

        let sql = format!("SELECT {PROMO_CODE_COLUMNS} FROM promo_codes ORDER BY created_at DESC");
        let codes = sqlx::query_as::<_, PromoCode>(&sql).fetch_all(&self.pool).await?;

        let mut listed = Vec::with_capacity(codes.len());
        for promo_code in codes {
            let aggregate = sqlx::query_as::<_, OrderAggregate>(
                r#"
                SELECT COUNT(*) AS orders,
                       COALESCE(SUM(total_cents), 0) AS total_cents,
                       COALESCE(SUM(promo_code_discount_cents), 0) AS discount_cents
                FROM orders
                WHERE promo_code_id = ?1
                "#,
            )
            .bind(&promo_code.id)
            .fetch_one(&self.pool)
            .await?;

            listed.push(PromoCodeMetrics {
                promo_code,
                orders: aggregate.orders,
                discount_given_cents: aggregate.discount_cents,
            });
        }

        debug!(count = listed.len(), "Listed promo codes");
        Ok(listed)
    }

    /// All promotions by most recent start, with order analytics.
    pub async fn list_promotions(&self, actor: &Actor) -> DbResult<Vec<PromotionMetrics>> {
        actor.require_admin("promotion.list")?;

        let sql = format!("SELECT {PROMOTION_COLUMNS} FROM promotions ORDER BY start_at DESC");
        let promotions = sqlx::query_as::<_, Promotion>(&sql).fetch_all(&self.pool).await?;

        let mut listed = Vec::with_capacity(promotions.len());
        for promotion in promotions {
            let aggregate = sqlx::query_as::<_, OrderAggregate>(
                r#"
                SELECT COUNT(*) AS orders,
                       COALESCE(SUM(total_cents), 0) AS total_cents,
                       COALESCE(SUM(promotion_discount_cents), 0) AS discount_cents
                FROM orders
                WHERE promotion_id = ?1
                "#,
            )
            .bind(&promotion.id)
            .fetch_one(&self.pool)
            .await?;

            listed.push(PromotionMetrics {
                promotion,
                orders: aggregate.orders,
                revenue_cents: aggregate.total_cents,
                discount_saved_cents: aggregate.discount_cents,
            });
        }

        Ok(listed)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{admin, test_db};
    use chrono::{Duration, TimeZone};
    use settle_core::CoreError;

    fn promo_input(code: &str) -> NewPromoCode {
        NewPromoCode {
            code: code.to_string(),
            description: Some("Launch week".to_string()),
            discount_type: DiscountType::Percentage,
            discount_value: 10,
            min_order_cents: None,
            start_at: "2020-01-01".to_string(),
            end_at: "2099-12-31T23:59:59".to_string(),
            max_usage: None,
        }
    }

    #[tokio::test]
    async fn test_create_promo_code_normalizes_and_finds_case_insensitively() {
        let db = test_db().await;
        let created = db
            .discounts()
            .create_promo_code(&admin(), promo_input(" save10 "))
            .await
            .unwrap();
        assert_eq!(created.code, "SAVE10");

        let found = db.discounts().find_code("Save10").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let db = test_db().await;
        db.discounts().create_promo_code(&admin(), promo_input("SAVE10")).await.unwrap();
        let err = db
            .discounts()
            .create_promo_code(&admin(), promo_input("save10"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::Validation(ValidationError::Duplicate { .. }))
        ));
    }

    #[tokio::test]
    async fn test_window_is_read_in_business_time() {
        let db = test_db().await;
        let mut input = promo_input("MIDNIGHT");
        input.start_at = "2024-03-01T00:00".to_string();
        input.end_at = "2024-03-02T00:00:00Z".to_string();

        let created = db.discounts().create_promo_code(&admin(), input).await.unwrap();
        assert_eq!(created.start_at, Utc.with_ymd_and_hms(2024, 2, 29, 16, 0, 0).unwrap());
        assert_eq!(created.end_at, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_percentage_clamped_and_bad_window_rejected() {
        let db = test_db().await;
        let mut input = promo_input("BIGSALE");
        input.discount_value = 150;
        let created = db.discounts().create_promo_code(&admin(), input).await.unwrap();
        assert_eq!(created.discount_value, 100);

        let mut input = promo_input("BACKWARDS");
        input.start_at = "2024-03-02".to_string();
        input.end_at = "2024-03-01".to_string();
        assert!(db.discounts().create_promo_code(&admin(), input).await.is_err());

        let mut input = promo_input("AB");
        input.max_usage = Some(5);
        assert!(db.discounts().create_promo_code(&admin(), input).await.is_err());
    }

    #[tokio::test]
    async fn test_promotion_toggle_and_active_selection() {
        let db = test_db().await;
        let repo = db.discounts();
        let now = Utc::now();

        let older = repo
            .create_promotion(
                &admin(),
                NewPromotion {
                    name: "Raya Sale".to_string(),
                    description: None,
                    discount_type: DiscountType::Fixed,
                    discount_value: 500,
                    start_at: (now - Duration::days(10)).to_rfc3339(),
                    end_at: (now + Duration::days(10)).to_rfc3339(),
                    max_usage: None,
                },
            )
            .await
            .unwrap();
        let newer = repo
            .create_promotion(
                &admin(),
                NewPromotion {
                    name: "Weekend Flash".to_string(),
                    description: None,
                    discount_type: DiscountType::Percentage,
                    discount_value: 5,
                    start_at: (now - Duration::days(1)).to_rfc3339(),
                    end_at: (now + Duration::days(1)).to_rfc3339(),
                    max_usage: Some(10),
                },
            )
            .await
            .unwrap();

        assert_eq!(repo.active_promotion().await.unwrap().unwrap().id, newer.id);

        repo.set_promotion_active(&admin(), &newer.id, false).await.unwrap();
        assert_eq!(repo.active_promotion().await.unwrap().unwrap().id, older.id);

        assert!(matches!(
            repo.set_promotion_active(&admin(), "missing", true).await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_charge_respects_cap() {
        let db = test_db().await;
        let mut input = promo_input("ONCE");
        input.max_usage = Some(1);
        let promo = db.discounts().create_promo_code(&admin(), input).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(charge_promo_code(&mut conn, &promo.id).await.unwrap());
        assert!(!charge_promo_code(&mut conn, &promo.id).await.unwrap());
        drop(conn);

        let loaded = db.discounts().get_promo_code(&promo.id).await.unwrap().unwrap();
        assert_eq!(loaded.completed_usage_count, 1);
    }

    #[tokio::test]
    async fn test_listing_requires_admin() {
        let db = test_db().await;
        db.discounts().create_promo_code(&admin(), promo_input("SAVE10")).await.unwrap();

        let listed = db.discounts().list_promo_codes(&admin()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].orders, 0);
        assert_eq!(listed[0].discount_given_cents, 0);

        assert!(db.discounts().list_promo_codes(&Actor::user("u-1")).await.is_err());
    }
}
