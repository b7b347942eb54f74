//! # Repository Module
//!
//! One repository per ledger or aggregate of the settle engine.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories and Shared Ledgers                      │
//! │                                                                         │
//! │  Host application                                                      │
//! │       │                                                                 │
//! │       │  db.orders().create_order(&actor, &lines, Some("SAVE10"), None)│
//! │       ▼                                                                 │
//! │  OrderRepository ────────┬──► inventory::reserve / restore             │
//! │  LoyaltyRepository ──────┤                                             │
//! │                          ├──► discount::charge_promo_code / promotion  │
//! │  VerificationRepository ─┤                                             │
//! │                          └──► audit::record                            │
//! │       │                                                                 │
//! │       │  one write transaction per operation                           │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Ledger helpers take `&mut SqliteConnection`, so a caller composes     │
//! │  them inside its own transaction and they commit or roll back as one. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`InventoryLedger`] - Product and gift stock counters
//! - [`ProductRepository`] - Catalog administration, featured cap
//! - [`GiftRepository`] - Loyalty gift catalog
//! - [`DiscountRepository`] - Promo codes and sitewide promotions
//! - [`OrderRepository`] - Order state machine
//! - [`LoyaltyRepository`] - Gift slots and redemptions
//! - [`VerificationRepository`] - Proof-of-purchase codes
//! - [`UserRepository`] - Loyalty counters and delivery details
//! - [`AuditRepository`] - Admin action log
//! - [`MetricsRepository`] - Dashboard counters

pub mod audit;
pub mod discount;
pub mod gift;
pub mod inventory;
pub mod loyalty;
pub mod metrics;
pub mod order;
pub mod product;
pub(crate) mod timestamp;
pub mod user;
pub mod verification;

pub use audit::AuditRepository;
pub use discount::{DiscountRepository, NewPromoCode, NewPromotion, PromoCodeMetrics, PromotionMetrics};
pub use gift::{GiftRepository, GiftUpdate, NewGift};
pub use inventory::{InventoryLedger, StockKind};
pub use loyalty::LoyaltyRepository;
pub use metrics::{MetricsRepository, MetricsSnapshot};
pub use order::{AutoCompleteReport, OrderRepository, SkippedOrder};
pub use product::{NewProduct, ProductRepository, ProductUpdate};
pub use user::{DeliveryProfile, UserRepository};
pub use verification::VerificationRepository;
