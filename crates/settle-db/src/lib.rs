//! # settle-db: Transactional Ledgers for the Settle Engine
//!
//! This crate runs every engine operation as a single SQLite transaction
//! on top of the pure rules in `settle-core`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Settle Engine Data Flow                          │
//! │                                                                         │
//! │  Host application (checkout, admin surface)                            │
//! │       │  Actor { user_id, role }                                        │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    settle-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ orders        │    │  (embedded)  │  │   │
//! │  │   │               │    │ loyalty       │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ verification  │    │ 001_initial_ │  │   │
//! │  │   │ EngineContext │    │ discounts ... │    │ schema.sql   │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │          │                     │                                │   │
//! │  │          ▼                     ▼                                │   │
//! │  │   RetryPolicy           Notifier (after COMMIT)                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, engine context, write transactions
//! - [`config`] - Engine tunables (TOML + `SETTLE_*` environment)
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`retry`] - Bounded retry of infrastructure failures
//! - [`notify`] - Best-effort notification hand-off
//! - [`repository`] - Ledger and aggregate repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use settle_db::{Database, DbConfig, EngineConfig};
//! use settle_core::{Actor, CartLine};
//!
//! let config = EngineConfig::load(None)?;
//! let db = Database::new(DbConfig::from_engine(&config))
//!     .await?
//!     .with_engine_config(config);
//!
//! let placed = db
//!     .orders()
//!     .create_order(&Actor::user(user_id), &[CartLine::new(product_id, 2)], Some("SAVE10"), None)
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod notify;
pub mod pool;
pub mod repository;
pub mod retry;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, EngineConfig};
pub use error::{DbError, DbResult};
pub use notify::{LogNotifier, Notification, Notifier, NotifyError};
pub use pool::{Database, DbConfig, EngineContext};
pub use retry::RetryPolicy;

// Repository re-exports for convenience
pub use repository::{
    AuditRepository, AutoCompleteReport, DeliveryProfile, DiscountRepository, GiftRepository,
    GiftUpdate, InventoryLedger, LoyaltyRepository, MetricsRepository, MetricsSnapshot, NewGift,
    NewProduct, NewPromoCode, NewPromotion, OrderRepository, ProductRepository, ProductUpdate,
    SkippedOrder, StockKind, UserRepository, VerificationRepository,
};
