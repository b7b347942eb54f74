//! # settle-core: Pure Settlement Logic
//!
//! This crate holds the rules that keep money, stock and usage counts
//! consistent. It contains all business logic as pure functions with zero
//! I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Settle Engine Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Presentation / Admin surface (external)              │   │
//! │  │    checkout, order admin, gift requests, code verification      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Actor { user_id, role }                │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                settle-db (transactions, ledgers)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ settle-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │  ┌─────────┐ ┌──────────┐ ┌─────────┐ ┌─────────┐ ┌──────────┐ │   │
//! │  │  │  money  │ │ discount │ │  order  │ │ loyalty │ │verificat.│ │   │
//! │  │  │  cents  │ │ stacking │ │  table  │ │  slots  │ │  digests │ │   │
//! │  │  └─────────┘ └──────────┘ └─────────┘ └─────────┘ └──────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Order, PromoCode, Redemption, etc.)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`discount`] - Promo code eligibility, promotion selection, stacking
//! - [`order`] - Cart normalisation, pricing, transition table
//! - [`loyalty`] - Gift eligibility and redemption transitions
//! - [`verification`] - Code normalisation and SHA-256 digests
//! - [`time`] - Business timezone (GMT+8) parsing
//! - [`error`] - Domain error types
//! - [`validation`] - Input shape rules
//!
//! ## Example Usage
//!
//! ```rust
//! use settle_core::discount::stack_discounts;
//! use settle_core::money::Money;
//!
//! let breakdown = stack_discounts(Money::from_cents(4200), None, None);
//! assert_eq!(breakdown.total_cents, 4200);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod discount;
pub mod error;
pub mod loyalty;
pub mod money;
pub mod order;
pub mod time;
pub mod types;
pub mod validation;
pub mod verification;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use discount::{resolve_discount, DiscountBreakdown};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use order::{CartLine, TransitionEffect, TransitionMetadata};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct lines in a single cart.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity of a single product per order.
///
/// ## Business Reason
/// Prevents accidental bulk orders on a manually confirmed checkout.
pub const MAX_LINE_QUANTITY: i64 = 10;

/// Highest unit price an admin may set (RM 100,000,000.00).
///
/// ## Business Reason
/// Keeps a full cart (`MAX_CART_LINES` × `MAX_LINE_QUANTITY` × this) far
/// inside i64 cents.
pub const MAX_PRICE_CENTS: i64 = 10_000_000_000;

/// Maximum length of customer messages and payment notes.
pub const MAX_NOTE_LENGTH: usize = 500;

pub const MIN_PROMO_CODE_LENGTH: usize = 3;
pub const MAX_PROMO_CODE_LENGTH: usize = 32;
pub const MIN_PROMOTION_NAME_LENGTH: usize = 3;

/// Verified purchases per gift slot (T).
pub const DEFAULT_GIFT_THRESHOLD: i64 = 10;

/// Featured products allowed at once.
pub const MAX_FEATURED_PRODUCTS: i64 = 3;

/// Days after which non-terminal orders are auto-completed.
pub const DEFAULT_AUTO_COMPLETE_DAYS: i64 = 14;

/// Business timezone offset: GMT+8.
pub const BUSINESS_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Currency recorded on orders.
pub const DEFAULT_CURRENCY: &str = "MYR";
