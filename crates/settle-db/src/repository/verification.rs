//! # Verification Repository
//!
//! Registry of single-use proof-of-purchase codes.
//!
//! ## Exactly-once Redemption
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 redeem(actor, code, security_code)                      │
//! │                                                                         │
//! │  digest both halves (trim + upper + SHA-256)                           │
//! │  BEGIN (write gate)                                                    │
//! │    ├── SELECT by (code_hash, security_hash)   none ──► CodeNotFound    │
//! │    ├── UPDATE verification_codes SET used_at = now                     │
//! │    │     WHERE id = ? AND used_at IS NULL      0 rows ──► CodeAlreadyUsed│
//! │    ├── INSERT purchases (verification_code_id UNIQUE)                  │
//! │    └── UPDATE users SET total_purchases + 1                            │
//! │  COMMIT                                                                │
//! │                                                                         │
//! │  Concurrent attempts on one pair: exactly one guarded UPDATE matches.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use settle_core::validation::{non_blank, validate_uuid};
use settle_core::verification::{CodeDigest, CodeImportRow, CodeStats, ImportReport};
use settle_core::{Actor, CoreError, Purchase, VerificationCode};

use crate::error::DbResult;
use crate::pool::{begin_write, EngineContext};
use crate::repository::audit;
use crate::repository::product::fetch_product;
use crate::repository::user::require_user;
use crate::repository::timestamp;

const CODE_COLUMNS: &str =
    "id, code_hash, security_hash, code_last4, security_last4, batch, product_id, used_at, created_at";

const PURCHASE_COLUMNS: &str = "id, user_id, verification_code_id, code_last4, batch, product_id, verified_at";

async fn fetch_code_by_pair(conn: &mut SqliteConnection, digest: &CodeDigest) -> DbResult<Option<VerificationCode>> {
    let sql = format!("SELECT {CODE_COLUMNS} FROM verification_codes WHERE code_hash = ?1 AND security_hash = ?2");
    let code = sqlx::query_as::<_, VerificationCode>(&sql)
        .bind(&digest.code_hash)
        .bind(&digest.security_hash)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(code)
}

async fn code_hash_exists(conn: &mut SqliteConnection, code_hash: &str) -> DbResult<bool> {
    let found: Option<String> = sqlx::query_scalar("SELECT id FROM verification_codes WHERE code_hash = ?1")
        .bind(code_hash)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Repository for verification codes and the purchases they fund.
#[derive(Debug, Clone)]
pub struct VerificationRepository {
    pool: SqlitePool,
    ctx: EngineContext,
}

impl VerificationRepository {
    pub fn new(pool: SqlitePool, ctx: EngineContext) -> Self {
        VerificationRepository { pool, ctx }
    }

    // =========================================================================
    // Import
    // =========================================================================

    /// Bulk-loads codes in one transaction.
    ///
    /// Rows failing validation are rejected with their index; codes already
    /// registered, or repeated within the batch, are skipped and reported by
    /// their last four characters. The rest are stored as digests.
    pub async fn import(&self, actor: &Actor, rows: &[CodeImportRow]) -> DbResult<ImportReport> {
        actor.require_admin("verification.import")?;

        let report = self
            .ctx
            .retry
            .run("verification.import", || self.try_import(actor, rows))
            .await?;

        info!(
            imported = report.imported,
            duplicates = report.duplicates.len(),
            rejected = report.rejected.len(),
            "Verification codes imported"
        );
        Ok(report)
    }

    async fn try_import(&self, actor: &Actor, rows: &[CodeImportRow]) -> DbResult<ImportReport> {
        let mut report = ImportReport::default();
        let mut seen = HashSet::with_capacity(rows.len());
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;

        for (index, row) in rows.iter().enumerate() {
            let digest = match CodeDigest::new(&row.code, &row.security_code) {
                Ok(digest) => digest,
                Err(err) => {
                    report.rejected.push((index, err.to_string()));
                    continue;
                }
            };

            let product_id = non_blank(row.product_id.as_deref());
            if let Some(product_id) = &product_id {
                if let Err(err) = validate_uuid(product_id) {
                    report.rejected.push((index, err.to_string()));
                    continue;
                }
                if fetch_product(&mut tx, product_id).await?.is_none() {
                    report
                        .rejected
                        .push((index, CoreError::ProductNotFound(product_id.clone()).to_string()));
                    continue;
                }
            }

            if !seen.insert(digest.code_hash.clone()) || code_hash_exists(&mut tx, &digest.code_hash).await? {
                report.duplicates.push(digest.code_last4);
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO verification_codes (
                    id, code_hash, security_hash, code_last4, security_last4, batch, product_id, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&digest.code_hash)
            .bind(&digest.security_hash)
            .bind(&digest.code_last4)
            .bind(&digest.security_last4)
            .bind(non_blank(row.batch.as_deref()))
            .bind(&product_id)
            .bind(timestamp::encode(now))
            .execute(&mut *tx)
            .await?;
            report.imported += 1;
        }

        audit::record(
            &mut tx,
            actor,
            "verification.import",
            "verification_codes",
            json!({
                "rows": rows.len(),
                "imported": report.imported,
                "duplicates": report.duplicates.len(),
                "rejected": report.rejected.len(),
            }),
        )
        .await?;
        tx.commit().await?;

        Ok(report)
    }

    // =========================================================================
    // Redemption
    // =========================================================================

    /// Redeems a code pair for the actor, crediting one verified purchase.
    ///
    /// ## Errors
    /// - `Validation` when either half is blank
    /// - `UserNotFound`
    /// - `CodeNotFound` when no pair matches
    /// - `CodeAlreadyUsed` when the code was redeemed before, including by a
    ///   concurrent caller that committed first
    pub async fn redeem(&self, actor: &Actor, code: &str, security_code: &str) -> DbResult<Purchase> {
        let digest = CodeDigest::new(code, security_code)?;
        let digest = &digest;

        let result = self
            .ctx
            .retry
            .run("verification.redeem", || self.try_redeem(actor, digest))
            .await;

        match &result {
            Ok(purchase) => info!(
                user_id = %purchase.user_id,
                code_last4 = %purchase.code_last4,
                "Verification code redeemed"
            ),
            Err(err) => warn!(
                user_id = %actor.user_id,
                code_last4 = %digest.code_last4,
                error = %err,
                "Verification code refused"
            ),
        }
        result
    }

    async fn try_redeem(&self, actor: &Actor, digest: &CodeDigest) -> DbResult<Purchase> {
        let mut tx = begin_write(&self.pool).await?;
        let user = require_user(&mut tx, &actor.user_id).await?;

        let code = fetch_code_by_pair(&mut tx, digest)
            .await?
            .ok_or(CoreError::CodeNotFound)?;
        if code.used_at.is_some() {
            return Err(CoreError::CodeAlreadyUsed.into());
        }

        let now = Utc::now();
        let claimed = sqlx::query("UPDATE verification_codes SET used_at = ?2 WHERE id = ?1 AND used_at IS NULL")
            .bind(&code.id)
            .bind(timestamp::encode(now))
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            return Err(CoreError::CodeAlreadyUsed.into());
        }

        let purchase = Purchase {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            verification_code_id: code.id.clone(),
            code_last4: code.code_last4.clone(),
            batch: code.batch.clone(),
            product_id: code.product_id.clone(),
            verified_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO purchases (id, user_id, verification_code_id, code_last4, batch, product_id, verified_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&purchase.id)
        .bind(&purchase.user_id)
        .bind(&purchase.verification_code_id)
        .bind(&purchase.code_last4)
        .bind(&purchase.batch)
        .bind(&purchase.product_id)
        .bind(timestamp::encode(purchase.verified_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET total_purchases = total_purchases + 1, updated_at = ?2 WHERE id = ?1")
            .bind(&user.id)
            .bind(timestamp::encode(now))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(purchase)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn stats(&self, actor: &Actor) -> DbResult<CodeStats> {
        actor.require_admin("verification.stats")?;

        let (total, used): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(used_at) FROM verification_codes",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CodeStats {
            total,
            used,
            unused: total - used,
        })
    }

    /// A user's verified purchases, newest first.
    pub async fn purchases(&self, actor: &Actor, user_id: &str) -> DbResult<Vec<Purchase>> {
        if actor.user_id != user_id {
            actor.require_admin("verification.purchases")?;
        }

        let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE user_id = ?1 ORDER BY verified_at DESC, id DESC");
        let purchases = sqlx::query_as::<_, Purchase>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(purchases)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
