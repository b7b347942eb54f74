//! # Validation Module
//!
//! Input validation for the settlement engine.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Presentation layer                                           │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Engine operation (Rust)                                      │
//! │  └── THIS MODULE: shape rules (lengths, ranges, windows)               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (inventory >= 0)                                            │
//! │  ├── UNIQUE constraints                                                │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use settle_core::validation::{normalize_promo_code, validate_quantity};
//!
//! assert_eq!(normalize_promo_code("  save10 ").unwrap(), "SAVE10");
//! validate_quantity(5).unwrap();
//! ```

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::types::DiscountType;
use crate::{
    MAX_CART_LINES, MAX_LINE_QUANTITY, MAX_NOTE_LENGTH, MAX_PRICE_CENTS, MAX_PROMO_CODE_LENGTH,
    MIN_PROMO_CODE_LENGTH, MIN_PROMOTION_NAME_LENGTH,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Normalises and validates a promo code.
///
/// ## Rules
/// - Trimmed and upper-cased (codes match case-insensitively)
/// - 3 to 32 characters
/// - Letters, digits, hyphens, underscores
///
/// ## Example
/// ```rust
/// use settle_core::validation::normalize_promo_code;
///
/// assert_eq!(normalize_promo_code("raya-2024").unwrap(), "RAYA-2024");
/// assert!(normalize_promo_code("ab").is_err());
/// assert!(normalize_promo_code("HAS SPACE").is_err());
/// ```
pub fn normalize_promo_code(code: &str) -> ValidationResult<String> {
    let code = code.trim().to_uppercase();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }

    let len = code.chars().count();
    if len < MIN_PROMO_CODE_LENGTH {
        return Err(ValidationError::TooShort {
            field: "code".to_string(),
            min: MIN_PROMO_CODE_LENGTH,
        });
    }
    if len > MAX_PROMO_CODE_LENGTH {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: MAX_PROMO_CODE_LENGTH,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(code)
}

/// Validates a product or gift name.
///
/// ## Rules
/// - Must not be empty
/// - At most 200 characters
pub fn validate_item_name(name: &str) -> ValidationResult<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.chars().count() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(name.to_string())
}

/// Validates a promotion name (at least 3 characters).
pub fn validate_promotion_name(name: &str) -> ValidationResult<String> {
    let name = validate_item_name(name)?;

    if name.chars().count() < MIN_PROMOTION_NAME_LENGTH {
        return Err(ValidationError::TooShort {
            field: "name".to_string(),
            min: MIN_PROMOTION_NAME_LENGTH,
        });
    }

    Ok(name)
}

/// Validates an optional free-text note (customer message, payment advice).
///
/// ## Returns
/// The trimmed note, or `None` when blank.
pub fn validate_note(field: &str, note: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if note.chars().count() > MAX_NOTE_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NOTE_LENGTH,
        });
    }

    Ok(Some(note.to_string()))
}

/// Trims an optional field, mapping blank input to `None`.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a cart line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY (10)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in cents. Zero is allowed, the ceiling is
/// `MAX_PRICE_CENTS`.
///
/// ## Example
/// ```rust
/// use settle_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents(1099).is_ok());
/// assert!(validate_price_cents(0).is_ok());
/// assert!(validate_price_cents(-100).is_err());
/// assert!(validate_price_cents(i64::MAX / 2).is_err());
/// ```
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_PRICE_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            min: 0,
            max: MAX_PRICE_CENTS,
        });
    }

    Ok(())
}

/// Validates a stock level. Zero is allowed.
pub fn validate_inventory(inventory: i64) -> ValidationResult<()> {
    if inventory < 0 {
        return Err(ValidationError::OutOfRange {
            field: "inventory".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a discount value and returns the value to store.
///
/// ## Rules
/// ```text
/// PERCENTAGE: clamped into 1..=100 (a 150% code becomes 100%)
/// FIXED:      cents, must be > 0
/// ```
pub fn validate_discount_value(discount_type: DiscountType, value: i64) -> ValidationResult<i64> {
    match discount_type {
        DiscountType::Percentage => Ok(value.clamp(1, 100)),
        DiscountType::Fixed => {
            if value <= 0 {
                Err(ValidationError::MustBePositive {
                    field: "discount value".to_string(),
                })
            } else {
                Ok(value)
            }
        }
    }
}

/// Validates a usage cap. `None` means unlimited.
pub fn validate_max_usage(max_usage: Option<i64>) -> ValidationResult<()> {
    match max_usage {
        Some(n) if n < 1 => Err(ValidationError::OutOfRange {
            field: "max usage".to_string(),
            min: 1,
            max: i64::MAX,
        }),
        _ => Ok(()),
    }
}

/// Validates a minimum order amount (cents, ≥ 0).
pub fn validate_min_order(min_order_cents: Option<i64>) -> ValidationResult<()> {
    match min_order_cents {
        Some(cents) if cents < 0 => Err(ValidationError::OutOfRange {
            field: "minimum order".to_string(),
            min: 0,
            max: i64::MAX,
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Window Validators
// =============================================================================

/// Validates a discount window: `end_at` must be strictly after `start_at`.
pub fn validate_window(start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> ValidationResult<()> {
    if end_at <= start_at {
        return Err(ValidationError::InvalidFormat {
            field: "end date".to_string(),
            reason: "must be after the start date".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates the number of distinct cart lines.
///
/// ## Rules
/// - Must not exceed MAX_CART_LINES (100)
pub fn validate_cart_size(lines: usize) -> ValidationResult<()> {
    if lines > MAX_CART_LINES {
        return Err(ValidationError::OutOfRange {
            field: "cart lines".to_string(),
            min: 1,
            max: MAX_CART_LINES as i64,
        });
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use settle_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
