//! Shared fixtures for the repository tests.

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::Mutex;
use uuid::Uuid;

use settle_core::{Actor, Gift, Product, Role, User};

use crate::notify::{Notification, Notifier, NotifyError};
use crate::pool::{Database, DbConfig};
use crate::repository::timestamp;

/// Fresh in-memory database with migrations applied.
pub async fn test_db() -> Database {
    Database::new(DbConfig::in_memory())
        .await
        .expect("in-memory database")
}

/// File-backed database for tests that need several real connections.
pub async fn file_db(dir: &TempDir, max_connections: u32) -> Database {
    let config = DbConfig::new(dir.path().join("settle.db"))
        .max_connections(max_connections)
        .min_connections(1);
    Database::new(config).await.expect("file database")
}

pub fn admin() -> Actor {
    Actor::admin("admin-1")
}

/// A user with complete delivery details.
pub async fn seed_user(db: &Database, email: &str, total_purchases: i64) -> User {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        name: Some("Test Customer".to_string()),
        role: Role::User,
        total_purchases,
        total_gifts: 0,
        phone_number: Some("+60123456789".to_string()),
        address_line1: Some("12 Jalan Ampang".to_string()),
        address_line2: None,
        city: Some("Kuala Lumpur".to_string()),
        state: Some("WP".to_string()),
        postal_code: Some("50450".to_string()),
        country: Some("MY".to_string()),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO users (
            id, email, name, role, total_purchases, total_gifts,
            phone_number, address_line1, address_line2, city, state, postal_code, country,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.name)
    .bind(user.role)
    .bind(user.total_purchases)
    .bind(user.total_gifts)
    .bind(&user.phone_number)
    .bind(&user.address_line1)
    .bind(&user.address_line2)
    .bind(&user.city)
    .bind(&user.state)
    .bind(&user.postal_code)
    .bind(&user.country)
    .bind(timestamp::encode(user.created_at))
    .bind(timestamp::encode(user.updated_at))
    .execute(db.pool())
    .await
    .expect("insert user");

    user
}

pub async fn seed_product(db: &Database, name: &str, price_cents: i64, inventory: i64) -> Product {
    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        price_cents,
        inventory,
        is_active: true,
        is_featured: false,
        created_at: now,
        updated_at: now,
    };

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
    .execute(db.pool())
    .await
    .expect("insert product");

    product
}

pub async fn seed_gift(db: &Database, name: &str, inventory: i64) -> Gift {
    let now = Utc::now();
    let gift = Gift {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        description: None,
        inventory,
        is_active: true,
        sort_order: 0,
        created_at: now,
        updated_at: now,
    };

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
    .execute(db.pool())
    .await
    .expect("insert gift");

    gift
}

// =============================================================================
// Notifier Doubles
// =============================================================================

/// Keeps every notification it is handed.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError("smtp unreachable".to_string()))
    }
}
