//! # Error Types
//!
//! Domain-specific error types for settle-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  settle-core errors (this file)                                        │
//! │  ├── CoreError        - Business rule violations (expected, recoverable)│
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  settle-db errors (separate crate)                                     │
//! │  └── DbError          - Storage failures + wrapped CoreError           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (code, ID, quantities)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing message

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business errors raised by the settlement engine.
///
/// Every variant is an expected outcome the caller renders as a message.
/// None of them indicate a broken process; storage failures live in
/// `settle_db::DbError`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stock counter cannot cover the requested quantity.
    ///
    /// ## When This Occurs
    /// ```text
    /// reserve(item, qty: 5)
    ///      │
    ///      ▼
    /// inventory = 3  (3 < 5)
    ///      │
    ///      ▼
    /// InsufficientStock { item: "prod-1", available: 3, requested: 5 }
    /// ```
    #[error("Insufficient stock for {item}: available {available}, requested {requested}")]
    InsufficientStock {
        item: String,
        available: i64,
        requested: i64,
    },

    /// An order line could not be reserved; the whole cart is rejected.
    #[error("{name} is out of stock: available {available}, requested {requested}")]
    OutOfStock {
        product_id: String,
        name: String,
        available: i64,
        requested: i64,
    },

    /// Product id does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Product exists but is not for sale.
    #[error("Product is not available: {0}")]
    ProductUnavailable(String),

    /// The cart has no lines.
    #[error("Cart must contain at least one item")]
    EmptyCart,

    /// Order id does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// The requested status change is not allowed from the current status.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: String,
        from: String,
        to: String,
    },

    /// No promo code with this name exists (or it is switched off).
    #[error("Promo code {0} is invalid")]
    PromoCodeInvalid(String),

    /// The current instant is outside the code's window.
    #[error("Promo code {0} has expired or is not yet active")]
    PromoCodeExpired(String),

    /// Cart subtotal is below the code's minimum spend.
    #[error("Promo code {code} requires a minimum order of {min_order_cents} cents (subtotal {subtotal_cents})")]
    PromoCodeBelowMinimum {
        code: String,
        min_order_cents: i64,
        subtotal_cents: i64,
    },

    /// The code's completed usage reached `max_usage`.
    #[error("Promo code {0} has reached its usage limit")]
    PromoCodeExhausted(String),

    /// The promotion's completed usage reached `max_usage`.
    #[error("Promotion {0} has reached its usage limit")]
    PromotionExhausted(String),

    /// User id does not exist.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// User has no unused gift slot, or no gift is in stock.
    #[error("Not eligible for gift redemption: eligible {eligible}, redeemed {redeemed}")]
    GiftNotEligible { eligible: i64, redeemed: i64 },

    /// The chosen gift has no stock left.
    #[error("Gift is out of stock: {0}")]
    GiftOutOfStock(String),

    /// Gift id does not exist.
    #[error("Gift not found: {0}")]
    GiftNotFound(String),

    /// Gift exists but is switched off.
    #[error("Gift is not available: {0}")]
    GiftUnavailable(String),

    /// Redemption id does not exist.
    #[error("Redemption not found: {0}")]
    RedemptionNotFound(String),

    /// The requested redemption status change is not allowed.
    #[error("Redemption {redemption_id} cannot move from {from} to {to}")]
    InvalidRedemptionTransition {
        redemption_id: String,
        from: String,
        to: String,
    },

    /// SHIPPED requires both courier name and tracking number.
    #[error("Courier name and tracking number are required when marking as shipped")]
    CourierDetailsRequired,

    /// User profile lacks the fields needed to ship a gift.
    #[error("Delivery details required before redemption: missing {fields:?}")]
    DeliveryDetailsMissing { fields: Vec<String> },

    /// No code/security-code pair matches.
    #[error("Verification code not found")]
    CodeNotFound,

    /// The code was already redeemed.
    #[error("Verification code has already been used")]
    CodeAlreadyUsed,

    /// Featured product cap reached.
    #[error("At most {max} products can be featured")]
    FeaturedLimitReached { max: i64 },

    /// Actor lacks the role required for the operation.
    #[error("Forbidden: {action} requires the ADMIN role")]
    Forbidden { action: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidTransition error.
    pub fn invalid_transition(
        order_id: impl Into<String>,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        CoreError::InvalidTransition {
            order_id: order_id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates a Forbidden error for the named action.
    pub fn forbidden(action: impl Into<String>) -> Self {
        CoreError::Forbidden {
            action: action.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., duplicate promo code).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            item: "prod-1".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for prod-1: available 3, requested 5"
        );

        let err = CoreError::invalid_transition("ord-1", "CANCELLED", "SENT");
        assert_eq!(err.to_string(), "Order ord-1 cannot move from CANCELLED to SENT");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "code".to_string(),
        };
        assert_eq!(err.to_string(), "code is required");

        let err = ValidationError::TooShort {
            field: "name".to_string(),
            min: 3,
        };
        assert_eq!(err.to_string(), "name must be at least 3 characters");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "code".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
