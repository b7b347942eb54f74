//! # User Repository
//!
//! Loyalty counters and delivery details for users. Identity itself is
//! external; a row here is created the first time a user is seen.
//!
//! ```text
//! total_purchases  ◄── verification redeem (+1), admin adjustment (±n, floor 0)
//! total_gifts      ◄── redemption request (+1), redemption rejected (−1)
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use settle_core::validation::non_blank;
use settle_core::{Actor, CoreError, Role, User, ValidationError};

use crate::error::{DbError, DbResult};
use crate::pool::begin_write;
use crate::repository::{audit, timestamp};

const USER_COLUMNS: &str = "id, email, name, role, total_purchases, total_gifts, phone_number, \
     address_line1, address_line2, city, state, postal_code, country, created_at, updated_at";

/// Delivery details a user maintains for gift shipments.
///
/// Blank fields clear the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryProfile {
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl DeliveryProfile {
    fn normalized(&self) -> Result<DeliveryProfile, ValidationError> {
        Ok(DeliveryProfile {
            name: bounded("name", self.name.as_deref(), 100)?,
            phone_number: bounded("phone number", self.phone_number.as_deref(), 30)?,
            address_line1: bounded("address line 1", self.address_line1.as_deref(), 120)?,
            address_line2: bounded("address line 2", self.address_line2.as_deref(), 120)?,
            city: bounded("city", self.city.as_deref(), 80)?,
            state: bounded("state", self.state.as_deref(), 80)?,
            postal_code: bounded("postal code", self.postal_code.as_deref(), 20)?,
            country: bounded("country", self.country.as_deref(), 80)?,
        })
    }
}

fn bounded(field: &str, value: Option<&str>, max: usize) -> Result<Option<String>, ValidationError> {
    match non_blank(value) {
        Some(v) if v.chars().count() > max => Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        }),
        other => Ok(other),
    }
}

pub(crate) async fn fetch_user(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(user)
}

pub(crate) async fn require_user(conn: &mut SqliteConnection, id: &str) -> DbResult<User> {
    fetch_user(conn, id)
        .await?
        .ok_or_else(|| DbError::Domain(CoreError::UserNotFound(id.to_string())))
}

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        UserRepository { pool }
    }

    /// Creates the loyalty row for a newly seen identity.
    pub async fn register(&self, email: &str, name: Option<&str>, role: Role) -> DbResult<User> {
        let email = non_blank(Some(email))
            .map(|e| e.to_lowercase())
            .ok_or_else(|| ValidationError::Required {
                field: "email".to_string(),
            })?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            name: non_blank(name),
            role,
            total_purchases: 0,
            total_gifts: 0,
            phone_number: None,
            address_line1: None,
            address_line2: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            created_at: now,
            updated_at: now,
        };

        let mut tx = begin_write(&self.pool).await?;
        let taken: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?1")
            .bind(&user.email)
            .fetch_optional(&mut *tx)
            .await?;
        if taken.is_some() {
            return Err(ValidationError::Duplicate {
                field: "email".to_string(),
                value: user.email,
            }
            .into());
        }

        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, role, total_purchases, total_gifts, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role)
        .bind(timestamp::encode(user.created_at))
        .bind(timestamp::encode(user.updated_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(id = %user.id, "User registered");
        Ok(user)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        fetch_user(&mut conn, id).await
    }

    /// Replaces the delivery details. Users edit their own; admins anyone's.
    pub async fn update_profile(&self, actor: &Actor, user_id: &str, profile: DeliveryProfile) -> DbResult<User> {
        if actor.user_id != user_id {
            actor.require_admin("user.update_profile")?;
        }
        let profile = profile.normalized()?;

        let mut tx = begin_write(&self.pool).await?;
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = COALESCE(?2, name),
                phone_number = ?3, address_line1 = ?4, address_line2 = ?5,
                city = ?6, state = ?7, postal_code = ?8, country = ?9,
                updated_at = ?10
            WHERE id = ?1
            "#,
        )
        .bind(user_id)
        .bind(&profile.name)
        .bind(&profile.phone_number)
        .bind(&profile.address_line1)
        .bind(&profile.address_line2)
        .bind(&profile.city)
        .bind(&profile.state)
        .bind(&profile.postal_code)
        .bind(&profile.country)
        .bind(timestamp::encode(Utc::now()))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::UserNotFound(user_id.to_string()).into());
        }

        let user = require_user(&mut tx, user_id).await?;
        tx.commit().await?;

        debug!(user_id, "Delivery profile updated");
        Ok(user)
    }

    /// Admin correction of the verified-purchase counter.
    ///
    /// The counter never drops below zero; a larger negative delta floors
    /// it at zero.
    ///
    /// ## Returns
    /// The new `total_purchases`.
    pub async fn adjust_purchases(&self, actor: &Actor, user_id: &str, delta: i64, reason: &str) -> DbResult<i64> {
        actor.require_admin("user.adjust_purchases")?;
        if delta == 0 {
            return Err(ValidationError::MustBePositive {
                field: "delta".to_string(),
            }
            .into());
        }
        let reason = non_blank(Some(reason)).ok_or_else(|| ValidationError::Required {
            field: "reason".to_string(),
        })?;

        let mut tx = begin_write(&self.pool).await?;
        let previous = require_user(&mut tx, user_id).await?.total_purchases;

        let new_total: i64 = sqlx::query_scalar(
            r#"
            UPDATE users
            SET total_purchases = MAX(total_purchases + ?2, 0), updated_at = ?3
            WHERE id = ?1
            RETURNING total_purchases
            "#,
        )
        .bind(user_id)
        .bind(delta)
        .bind(timestamp::encode(Utc::now()))
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            actor,
            "user.adjust_purchases",
            user_id,
            json!({
                "delta": delta,
                "reason": reason,
                "previous_total": previous,
                "new_total": new_total,
            }),
        )
        .await?;
        tx.commit().await?;

        info!(user_id, delta, previous, new_total, "Purchases adjusted");
        Ok(new_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{admin, seed_user, test_db};

    #[tokio::test]
    async fn test_register_and_duplicate_email() {
        let db = test_db().await;
        let user = db.users().register(" Aisha@Example.com ", Some("Aisha"), Role::User).await.unwrap();
        assert_eq!(user.email, "aisha@example.com");
        assert_eq!(user.total_purchases, 0);

        let err = db.users().register("aisha@example.com", None, Role::User).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::Validation(ValidationError::Duplicate { .. }))
        ));
    }

    #[tokio::test]
    async fn test_update_own_profile_only() {
        let db = test_db().await;
        let user = db.users().register("lee@example.com", None, Role::User).await.unwrap();
        let other = db.users().register("tan@example.com", None, Role::User).await.unwrap();

        let profile = DeliveryProfile {
            phone_number: Some(" +60111222333 ".to_string()),
            address_line1: Some("8 Lorong Kurau".to_string()),
            city: Some("Penang".to_string()),
            state: Some("PNG".to_string()),
            postal_code: Some("10250".to_string()),
            country: Some("MY".to_string()),
            ..Default::default()
        };

        let updated = db
            .users()
            .update_profile(&Actor::user(&user.id), &user.id, profile.clone())
            .await
            .unwrap();
        assert_eq!(updated.phone_number.as_deref(), Some("+60111222333"));
        assert!(settle_core::loyalty::missing_delivery_fields(&updated).is_empty());

        let err = db
            .users()
            .update_profile(&Actor::user(&other.id), &user.id, profile)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Forbidden { .. })));
    }

    #[tokio::test]
    async fn test_adjust_purchases_floors_at_zero() {
        let db = test_db().await;
        let user = seed_user(&db, "ng@example.com", 3).await;

        assert_eq!(db.users().adjust_purchases(&admin(), &user.id, 4, "paper receipts").await.unwrap(), 7);
        assert_eq!(db.users().adjust_purchases(&admin(), &user.id, -20, "fraud").await.unwrap(), 0);

        let entries = db.audit().for_target(&user.id).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_adjust_purchases_validation() {
        let db = test_db().await;
        let user = seed_user(&db, "ng@example.com", 3).await;

        assert!(db.users().adjust_purchases(&admin(), &user.id, 0, "noop").await.is_err());
        assert!(db.users().adjust_purchases(&admin(), &user.id, 1, "  ").await.is_err());
        assert!(matches!(
            db.users().adjust_purchases(&Actor::user(&user.id), &user.id, 1, "self").await,
            Err(DbError::Domain(CoreError::Forbidden { .. }))
        ));
        assert!(matches!(
            db.users().adjust_purchases(&admin(), "missing", 1, "typo").await,
            Err(DbError::Domain(CoreError::UserNotFound(_)))
        ));
    }
}
