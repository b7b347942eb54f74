//! # Gift Repository
//!
//! Catalog of loyalty gifts. Gift stock shares the inventory ledger with
//! products; redemptions reserve and restore it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use settle_core::validation::{non_blank, validate_inventory, validate_item_name};
use settle_core::{Actor, CoreError, Gift};

use crate::error::DbResult;
use crate::pool::begin_write;
use crate::repository::{audit, timestamp};

const GIFT_COLUMNS: &str =
    "id, name, description, inventory, is_active, sort_order, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGift {
    pub name: String,
    pub description: Option<String>,
    pub inventory: i64,
    pub sort_order: i64,
}

/// Partial gift edit. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub inventory: Option<i64>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i64>,
}

pub(crate) async fn fetch_gift(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Gift>> {
    let sql = format!("SELECT {GIFT_COLUMNS} FROM gifts WHERE id = ?1");
    let gift = sqlx::query_as::<_, Gift>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(gift)
}

/// Active gifts in display order.
pub(crate) async fn fetch_active_gifts(conn: &mut SqliteConnection) -> DbResult<Vec<Gift>> {
    let sql = format!("SELECT {GIFT_COLUMNS} FROM gifts WHERE is_active = 1 ORDER BY sort_order, name");
    let gifts = sqlx::query_as::<_, Gift>(&sql).fetch_all(&mut *conn).await?;
    Ok(gifts)
}

#[derive(Debug, Clone)]
pub struct GiftRepository {
    pool: SqlitePool,
}

impl GiftRepository {
    pub fn new(pool: SqlitePool) -> Self {
        GiftRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Gift>> {
        let mut conn = self.pool.acquire().await?;
        fetch_gift(&mut conn, id).await
    }

    /// Active gifts ordered by `sort_order`.
    pub async fn list_active(&self) -> DbResult<Vec<Gift>> {
        let mut conn = self.pool.acquire().await?;
        fetch_active_gifts(&mut conn).await
    }

    pub async fn create(&self, actor: &Actor, input: NewGift) -> DbResult<Gift> {
        actor.require_admin("gift.create")?;
        let name = validate_item_name(&input.name)?;
        validate_inventory(input.inventory)?;

        let now = Utc::now();
        let gift = Gift {
            id: Uuid::new_v4().to_string(),
            name,
            description: non_blank(input.description.as_deref()),
            inventory: input.inventory,
            is_active: true,
            sort_order: input.sort_order,
            created_at: now,
            updated_at: now,
        };

        let mut tx = begin_write(&self.pool).await?;
        sqlx::query(
            r#"
            INSERT INTO gifts (id, name, description, inventory, is_active, sort_order, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&gift.id)
        .bind(&gift.name)
        .bind(&gift.description)
        .bind(gift.inventory)
        .bind(gift.is_active)
        .bind(gift.sort_order)
        .bind(timestamp::encode(gift.created_at))
        .bind(timestamp::encode(gift.updated_at))
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            actor,
            "gift.create",
            &gift.id,
            json!({ "name": gift.name, "inventory": gift.inventory }),
        )
        .await?;
        tx.commit().await?;

        info!(id = %gift.id, name = %gift.name, "Gift created");
        Ok(gift)
    }

    pub async fn update(&self, actor: &Actor, id: &str, changes: GiftUpdate) -> DbResult<Gift> {
        actor.require_admin("gift.update")?;
        let name = changes.name.as_deref().map(validate_item_name).transpose()?;
        if let Some(inventory) = changes.inventory {
            validate_inventory(inventory)?;
        }

        let mut tx = begin_write(&self.pool).await?;
        let mut gift = fetch_gift(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::GiftNotFound(id.to_string()))?;

        if let Some(name) = name {
            gift.name = name;
        }
        if changes.description.is_some() {
            gift.description = non_blank(changes.description.as_deref());
        }
        if let Some(inventory) = changes.inventory {
            gift.inventory = inventory;
        }
        if let Some(is_active) = changes.is_active {
            gift.is_active = is_active;
        }
        if let Some(sort_order) = changes.sort_order {
            gift.sort_order = sort_order;
        }
        gift.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE gifts
            SET name = ?2, description = ?3, inventory = ?4, is_active = ?5, sort_order = ?6, updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&gift.id)
        .bind(&gift.name)
        .bind(&gift.description)
        .bind(gift.inventory)
        .bind(gift.is_active)
        .bind(gift.sort_order)
        .bind(timestamp::encode(gift.updated_at))
        .execute(&mut *tx)
        .await?;

        audit::record(&mut tx, actor, "gift.update", id, serde_json::to_value(&changes)?).await?;
        tx.commit().await?;

        info!(id, "Gift updated");
        Ok(gift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::testing::{admin, test_db};

    fn new_gift(name: &str, sort_order: i64) -> NewGift {
        NewGift {
            name: name.to_string(),
            description: Some("  ".to_string()),
            inventory: 5,
            sort_order,
        }
    }

    #[tokio::test]
    async fn test_list_active_by_sort_order() {
        let db = test_db().await;
        let repo = db.gifts();
        let second = repo.create(&admin(), new_gift("Mug", 2)).await.unwrap();
        let first = repo.create(&admin(), new_gift("Tote Bag", 1)).await.unwrap();
        assert_eq!(first.description, None);

        let listed: Vec<String> = repo.list_active().await.unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(listed, vec![first.id.clone(), second.id.clone()]);

        repo.update(
            &admin(),
            &first.id,
            GiftUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(repo.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_gift() {
        let db = test_db().await;
        let err = db
            .gifts()
            .update(&admin(), "missing", GiftUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::GiftNotFound(_))));
    }

    #[tokio::test]
    async fn test_user_cannot_create() {
        let db = test_db().await;
        let err = db
            .gifts()
            .create(&Actor::user("u-1"), new_gift("Mug", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Forbidden { .. })));
    }
}
