//! # Audit Log
//!
//! Append-only record of administrative actions.
//!
//! Entries are written on the caller's transaction connection, so an
//! audited change and its audit row commit or roll back together.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use settle_core::{Actor, AuditEntry};

use crate::error::DbResult;
use crate::repository::timestamp;

/// Appends one audit entry on `conn`.
pub(crate) async fn record(
    conn: &mut SqliteConnection,
    actor: &Actor,
    action: &str,
    target_id: &str,
    details: serde_json::Value,
) -> DbResult<()> {
    let details = serde_json::to_string(&details)?;

    sqlx::query(
        r#"
        INSERT INTO audit_log (id, actor_id, action, target_id, details, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&actor.user_id)
    .bind(action)
    .bind(target_id)
    .bind(&details)
    .bind(timestamp::encode(Utc::now()))
    .execute(&mut *conn)
    .await?;

    debug!(actor = %actor.user_id, action, target_id, "Audit entry recorded");
    Ok(())
}

/// Read access to the audit log.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AuditRepository { pool }
    }

    /// Entries about one target, newest first.
    pub async fn for_target(&self, target_id: &str) -> DbResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, actor_id, action, target_id, details, created_at
            FROM audit_log
            WHERE target_id = ?1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Most recent entries across all targets.
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, actor_id, action, target_id, details, created_at
            FROM audit_log
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{admin, test_db};
    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let db = test_db().await;
        let mut tx = db.pool().begin().await.unwrap();
        record(&mut tx, &admin(), "order.cancel", "ord-1", json!({ "from": "PROCESSING" }))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let entries = db.audit().for_target("ord-1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "order.cancel");
        assert_eq!(entries[0].actor_id, "admin-1");

        let details: serde_json::Value = serde_json::from_str(&entries[0].details).unwrap();
        assert_eq!(details["from"], "PROCESSING");
    }

    #[tokio::test]
    async fn test_rolled_back_entry_is_discarded() {
        let db = test_db().await;
        let mut tx = db.pool().begin().await.unwrap();
        record(&mut tx, &admin(), "user.adjust_purchases", "u-1", json!({}))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(db.audit().recent(10).await.unwrap().is_empty());
    }
}
