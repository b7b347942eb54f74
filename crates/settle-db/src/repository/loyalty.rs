//! # Loyalty Repository
//!
//! Gift slots and the redemption lifecycle.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │               request_redemption(actor, Option<gift>)                   │
//! │                                                                         │
//! │  BEGIN (write gate)                                                    │
//! │    ├── delivery details complete?          no ──► DeliveryDetailsMissing│
//! │    ├── free slot + any gift in stock?      no ──► GiftNotEligible      │
//! │    ├── chosen gift active with stock?      no ──► GiftUnavailable /     │
//! │    │     (skipped without a gift)                 GiftOutOfStock       │
//! │    ├── reserve 1 unit of gift stock        (only with a gift)          │
//! │    ├── UPDATE users SET total_gifts + 1                                │
//! │    │     WHERE total_purchases / T > total_gifts   (guarded slot)      │
//! │    └── INSERT redemption (PENDING)                                     │
//! │  COMMIT ──► notify                                                     │
//! │                                                                         │
//! │  REJECTED later gives back the slot and any reserved gift unit.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use settle_core::loyalty::{
    can_request_redemption, ensure_can_request, ensure_delivery_details, ensure_gift_available,
    plan_redemption_transition, CourierInfo, LoyaltySummary, RedemptionEffect,
};
use settle_core::{Actor, CoreError, Redemption, RedemptionStatus};

use crate::error::{DbError, DbResult};
use crate::notify::{deliver, Notification};
use crate::pool::{begin_write, EngineContext};
use crate::repository::audit;
use crate::repository::gift::{fetch_active_gifts, fetch_gift};
use crate::repository::inventory::{self, StockKind};
use crate::repository::user::require_user;
use crate::repository::timestamp;

const REDEMPTION_COLUMNS: &str = "id, user_id, gift_id, status, courier_name, tracking_number, \
     shipped_at, reviewed_by, created_at, updated_at";

pub(crate) async fn fetch_redemption(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Redemption>> {
    let sql = format!("SELECT {REDEMPTION_COLUMNS} FROM redemptions WHERE id = ?1");
    let redemption = sqlx::query_as::<_, Redemption>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(redemption)
}

/// Repository for gift eligibility and redemptions.
#[derive(Debug, Clone)]
pub struct LoyaltyRepository {
    pool: SqlitePool,
    ctx: EngineContext,
}

impl LoyaltyRepository {
    pub fn new(pool: SqlitePool, ctx: EngineContext) -> Self {
        LoyaltyRepository { pool, ctx }
    }

    /// The user's standing against the configured threshold.
    pub async fn summary(&self, user_id: &str) -> DbResult<LoyaltySummary> {
        let mut conn = self.pool.acquire().await?;
        let user = require_user(&mut conn, user_id).await?;
        Ok(LoyaltySummary::for_user(&user, self.ctx.gift_threshold()))
    }

    /// Whether a redemption request would currently be allowed.
    pub async fn can_request(&self, user_id: &str) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        let user = require_user(&mut conn, user_id).await?;
        let gifts = fetch_active_gifts(&mut conn).await?;
        Ok(can_request_redemption(&user, self.ctx.gift_threshold(), &gifts))
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Spends one gift slot for the actor.
    ///
    /// With `Some(gift_id)` one unit of that gift is reserved. With `None`
    /// the request leaves the choice of gift to the admin and reserves
    /// nothing.
    ///
    /// ## Errors
    /// - `UserNotFound`
    /// - `DeliveryDetailsMissing` listing the empty profile fields
    /// - `GiftNotEligible` without a free slot or any stocked gift
    /// - `GiftNotFound` / `GiftUnavailable` / `GiftOutOfStock`
    pub async fn request_redemption(&self, actor: &Actor, gift_id: Option<&str>) -> DbResult<Redemption> {
        let redemption = self
            .ctx
            .retry
            .run("loyalty.request", || self.try_request(actor, gift_id))
            .await?;

        info!(
            redemption_id = %redemption.id,
            user_id = %redemption.user_id,
            gift_id = gift_id.unwrap_or("-"),
            "Redemption requested"
        );
        deliver(
            self.ctx.notifier.as_ref(),
            Notification::RedemptionStatusChanged {
                redemption_id: redemption.id.clone(),
                user_id: redemption.user_id.clone(),
                status: redemption.status,
            },
        )
        .await;

        Ok(redemption)
    }

    async fn try_request(&self, actor: &Actor, gift_id: Option<&str>) -> DbResult<Redemption> {
        let threshold = self.ctx.gift_threshold();
        let mut tx = begin_write(&self.pool).await?;

        let user = require_user(&mut tx, &actor.user_id).await?;
        ensure_delivery_details(&user)?;

        let gifts = fetch_active_gifts(&mut tx).await?;
        ensure_can_request(&user, threshold, &gifts)?;

        let gift = match gift_id {
            Some(gift_id) => {
                let gift = fetch_gift(&mut tx, gift_id)
                    .await?
                    .ok_or_else(|| CoreError::GiftNotFound(gift_id.to_string()))?;
                ensure_gift_available(&gift)?;

                inventory::reserve(&mut tx, StockKind::Gift, &gift.id, 1)
                    .await
                    .map_err(|err| match err {
                        DbError::Domain(CoreError::InsufficientStock { .. }) => {
                            DbError::Domain(CoreError::GiftOutOfStock(gift.name.clone()))
                        }
                        other => other,
                    })?;
                Some(gift)
            }
            None => None,
        };

        let now = Utc::now();
        let slot = sqlx::query(
            r#"
            UPDATE users
            SET total_gifts = total_gifts + 1, updated_at = ?3
            WHERE id = ?1 AND total_purchases / ?2 > total_gifts
            "#,
        )
        .bind(&user.id)
        .bind(threshold)
        .bind(timestamp::encode(now))
        .execute(&mut *tx)
        .await?;

        if slot.rows_affected() == 0 {
            return Err(CoreError::GiftNotEligible {
                eligible: settle_core::loyalty::eligible_gifts(user.total_purchases, threshold),
                redeemed: user.total_gifts,
            }
            .into());
        }

        let redemption = Redemption {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            gift_id: gift.map(|g| g.id),
            status: RedemptionStatus::Pending,
            courier_name: None,
            tracking_number: None,
            shipped_at: None,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO redemptions (id, user_id, gift_id, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&redemption.id)
        .bind(&redemption.user_id)
        .bind(&redemption.gift_id)
        .bind(redemption.status)
        .bind(timestamp::encode(redemption.created_at))
        .bind(timestamp::encode(redemption.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(redemption)
    }

    // =========================================================================
    // Review
    // =========================================================================

    /// Admin review of a redemption.
    ///
    /// PENDING → APPROVED | REJECTED, APPROVED → SHIPPED (courier details
    /// required). Rejection returns the slot and any reserved gift unit.
    pub async fn update_redemption_status(
        &self,
        actor: &Actor,
        redemption_id: &str,
        to: RedemptionStatus,
        courier: Option<CourierInfo>,
    ) -> DbResult<Redemption> {
        actor.require_admin("redemption.update_status")?;
        let courier = courier.as_ref();

        let redemption = self
            .ctx
            .retry
            .run("loyalty.review", || self.try_update_status(actor, redemption_id, to, courier))
            .await?;

        info!(redemption_id, status = %redemption.status, "Redemption status changed");
        deliver(
            self.ctx.notifier.as_ref(),
            Notification::RedemptionStatusChanged {
                redemption_id: redemption.id.clone(),
                user_id: redemption.user_id.clone(),
                status: redemption.status,
            },
        )
        .await;

        Ok(redemption)
    }

    async fn try_update_status(
        &self,
        actor: &Actor,
        redemption_id: &str,
        to: RedemptionStatus,
        courier: Option<&CourierInfo>,
    ) -> DbResult<Redemption> {
        let mut tx = begin_write(&self.pool).await?;
        let mut redemption = fetch_redemption(&mut tx, redemption_id)
            .await?
            .ok_or_else(|| CoreError::RedemptionNotFound(redemption_id.to_string()))?;
        let from = redemption.status;

        let effect = plan_redemption_transition(redemption_id, from, to, courier)?;
        let now = Utc::now();

        match &effect {
            RedemptionEffect::Approve => {}
            RedemptionEffect::Reject => {
                if let Some(gift_id) = &redemption.gift_id {
                    inventory::restore(&mut tx, StockKind::Gift, gift_id, 1).await?;
                }
                sqlx::query(
                    "UPDATE users SET total_gifts = MAX(total_gifts - 1, 0), updated_at = ?2 WHERE id = ?1",
                )
                .bind(&redemption.user_id)
                .bind(timestamp::encode(now))
                .execute(&mut *tx)
                .await?;
            }
            RedemptionEffect::Ship(info) => {
                redemption.courier_name = Some(info.courier_name.clone());
                redemption.tracking_number = Some(info.tracking_number.clone());
                redemption.shipped_at = Some(now);
            }
        }

        redemption.status = to;
        redemption.reviewed_by = Some(actor.user_id.clone());
        redemption.updated_at = now;

        sqlx::query(
            r#"
            UPDATE redemptions
            SET status = ?2, courier_name = ?3, tracking_number = ?4, shipped_at = ?5,
                reviewed_by = ?6, updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&redemption.id)
        .bind(redemption.status)
        .bind(&redemption.courier_name)
        .bind(&redemption.tracking_number)
        .bind(timestamp::encode_opt(redemption.shipped_at))
        .bind(&redemption.reviewed_by)
        .bind(timestamp::encode(redemption.updated_at))
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            actor,
            "redemption.update_status",
            redemption_id,
            json!({
                "from": from,
                "to": to,
                "courier_name": redemption.courier_name,
                "tracking_number": redemption.tracking_number,
            }),
        )
        .await?;
        tx.commit().await?;

        debug!(redemption_id, %from, %to, "Redemption reviewed");
        Ok(redemption)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, redemption_id: &str) -> DbResult<Option<Redemption>> {
        let mut conn = self.pool.acquire().await?;
        fetch_redemption(&mut conn, redemption_id).await
    }

    /// A user's redemptions, newest first. Users see their own; admins
    /// anyone's.
    pub async fn history(&self, actor: &Actor, user_id: &str) -> DbResult<Vec<Redemption>> {
        if actor.user_id != user_id {
            actor.require_admin("redemption.history")?;
        }

        let sql = format!(
            "SELECT {REDEMPTION_COLUMNS} FROM redemptions WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        );
        let redemptions = sqlx::query_as::<_, Redemption>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(redemptions)
    }

    /// Admin queue, oldest first.
    pub async fn list_by_status(&self, actor: &Actor, status: RedemptionStatus) -> DbResult<Vec<Redemption>> {
        actor.require_admin("redemption.list")?;

        let sql = format!("SELECT {REDEMPTION_COLUMNS} FROM redemptions WHERE status = ?1 ORDER BY created_at, id");
        let redemptions = sqlx::query_as::<_, Redemption>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(redemptions)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
