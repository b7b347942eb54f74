//! # Metrics
//!
//! Read-only counters for the admin dashboard.
//!
//! ```text
//! orders_by_status       PROCESSING 4 │ CONFIRMED 1 │ SENT 0 │ ...
//! redemptions_by_status  PENDING 2    │ APPROVED 0  │ ...
//! users, purchases       totals
//! oldest_processing      the orders waiting longest for payment review
//! ```

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;

use settle_core::{Actor, Order, OrderStatus, RedemptionStatus};

use crate::error::DbResult;
use crate::repository::order::ORDER_COLUMNS;

/// Oldest PROCESSING orders included in a snapshot.
pub const OLDEST_PROCESSING_LIMIT: i64 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Every status, zero-filled, in lifecycle order.
    pub orders_by_status: Vec<(OrderStatus, i64)>,
    pub redemptions_by_status: Vec<(RedemptionStatus, i64)>,
    pub users: i64,
    pub verified_purchases: i64,
    pub oldest_processing: Vec<Order>,
}

impl MetricsSnapshot {
    pub fn orders_in(&self, status: OrderStatus) -> i64 {
        self.orders_by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, n)| *n)
    }

    pub fn redemptions_in(&self, status: RedemptionStatus) -> i64 {
        self.redemptions_by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, n)| *n)
    }
}

#[derive(Debug, Clone)]
pub struct MetricsRepository {
    pool: SqlitePool,
}

impl MetricsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MetricsRepository { pool }
    }

    pub async fn snapshot(&self, actor: &Actor) -> DbResult<MetricsSnapshot> {
        actor.require_admin("metrics.snapshot")?;

        let order_rows: Vec<(OrderStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM orders GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let order_counts: HashMap<OrderStatus, i64> = order_rows.into_iter().collect();

        let redemption_rows: Vec<(RedemptionStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM redemptions GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let redemption_counts: HashMap<RedemptionStatus, i64> = redemption_rows.into_iter().collect();

        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        let verified_purchases: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM purchases")
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = 'PROCESSING' ORDER BY created_at, id LIMIT ?1"
        );
        let oldest_processing = sqlx::query_as::<_, Order>(&sql)
            .bind(OLDEST_PROCESSING_LIMIT)
            .fetch_all(&self.pool)
            .await?;

        Ok(MetricsSnapshot {
            orders_by_status: OrderStatus::ALL
                .into_iter()
                .map(|s| (s, order_counts.get(&s).copied().unwrap_or(0)))
                .collect(),
            redemptions_by_status: RedemptionStatus::ALL
                .into_iter()
                .map(|s| (s, redemption_counts.get(&s).copied().unwrap_or(0)))
                .collect(),
            users,
            verified_purchases,
            oldest_processing,
        })
    }
}
