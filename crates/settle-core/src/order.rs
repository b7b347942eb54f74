//! # Order Rules
//!
//! Pure rules behind the order state machine: cart normalisation, pricing
//! and the transition table. The side effects (reservations, usage ledger,
//! restores) are executed by `settle-db` according to the
//! [`TransitionEffect`] returned here.
//!
//! ## Transition Table
//! ```text
//! ┌──────────────┬────────────┬───────────┬──────┬───────────┬───────────┐
//! │ from \ to    │ PROCESSING │ CONFIRMED │ SENT │ COMPLETED │ CANCELLED │
//! ├──────────────┼────────────┼───────────┼──────┼───────────┼───────────┤
//! │ PROCESSING   │ metadata   │ advance   │  ✗   │ complete  │ cancel    │
//! │ CONFIRMED    │     ✗      │ metadata  │ adv. │ complete  │ cancel    │
//! │ SENT         │     ✗      │     ✗     │ meta │ complete  │ cancel    │
//! │ COMPLETED    │     ✗      │     ✗     │  ✗   │     ✗     │     ✗     │
//! │ CANCELLED    │     ✗      │     ✗     │  ✗   │     ✗     │     ✗     │
//! └──────────────┴────────────┴───────────┴──────┴───────────┴───────────┘
//! ```
//!
//! Terminal orders reject everything, which is what makes cancellation
//! restore inventory exactly once.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{Order, OrderStatus, Product};
use crate::validation::{non_blank, validate_cart_size, validate_note, validate_quantity};

// =============================================================================
// Cart
// =============================================================================

/// A requested cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: i64,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        CartLine {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Merges duplicate product lines and validates the result.
///
/// Order of first appearance is kept so reservations always run in the
/// same sequence for the same cart.
///
/// ## Errors
/// - `EmptyCart` for no lines
/// - `Validation` for a quantity outside 1..=10 (after merging) or more
///   than 100 distinct lines
pub fn normalize_cart(lines: &[CartLine]) -> CoreResult<Vec<CartLine>> {
    if lines.is_empty() {
        return Err(CoreError::EmptyCart);
    }

    let mut merged: Vec<CartLine> = Vec::with_capacity(lines.len());
    let mut index: HashMap<&str, usize> = HashMap::new();

    for line in lines {
        validate_quantity(line.quantity)?;
        let product_id = line.product_id.trim();

        match index.get(product_id) {
            Some(&i) => merged[i].quantity += line.quantity,
            None => {
                index.insert(product_id, merged.len());
                merged.push(CartLine::new(product_id, line.quantity));
            }
        }
    }

    validate_cart_size(merged.len())?;
    for line in &merged {
        validate_quantity(line.quantity)?;
    }

    Ok(merged)
}

/// A cart line priced against the catalog, ready to snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
}

impl PricedLine {
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }
}

/// Prices normalised lines against loaded products.
///
/// ## Errors
/// - `ProductNotFound` when a product id was not loaded
/// - `ProductUnavailable` when the product is switched off
/// - `Validation(OutOfRange)` when a line total does not fit in i64 cents
pub fn price_cart(lines: &[CartLine], products: &HashMap<String, Product>) -> CoreResult<Vec<PricedLine>> {
    lines
        .iter()
        .map(|line| {
            let product = products
                .get(&line.product_id)
                .ok_or_else(|| CoreError::ProductNotFound(line.product_id.clone()))?;

            if !product.is_active {
                return Err(CoreError::ProductUnavailable(product.name.clone()));
            }

            Money::from_cents(product.price_cents)
                .checked_multiply_quantity(line.quantity)
                .ok_or_else(|| amount_out_of_range("line_total"))?;

            Ok(PricedLine {
                product_id: product.id.clone(),
                name: product.name.clone(),
                unit_price_cents: product.price_cents,
                quantity: line.quantity,
            })
        })
        .collect()
}

/// Sum of line totals, refused with `Validation(OutOfRange)` on overflow.
pub fn subtotal(lines: &[PricedLine]) -> CoreResult<Money> {
    lines.iter().try_fold(Money::zero(), |acc, line| {
        Money::from_cents(line.unit_price_cents)
            .checked_multiply_quantity(line.quantity)
            .and_then(|total| acc.checked_add(total))
            .ok_or_else(|| amount_out_of_range("subtotal"))
    })
}

fn amount_out_of_range(field: &str) -> CoreError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        min: 0,
        max: i64::MAX,
    }
    .into()
}

// =============================================================================
// Transitions
// =============================================================================

/// What a permitted status change requires of the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// Same status: only metadata changes.
    MetadataOnly,
    /// Forward step (PROCESSING→CONFIRMED, CONFIRMED→SENT).
    Advance,
    /// First arrival at COMPLETED: charge the usage ledgers.
    Complete,
    /// Arrival at CANCELLED: restore every line's reservation.
    Cancel,
}

/// Decides whether `from → to` is legal and what it entails.
///
/// ```rust
/// use settle_core::order::{plan_transition, TransitionEffect};
/// use settle_core::types::OrderStatus;
///
/// let effect = plan_transition("ord-1", OrderStatus::Processing, OrderStatus::Completed).unwrap();
/// assert_eq!(effect, TransitionEffect::Complete);
/// assert!(plan_transition("ord-1", OrderStatus::Cancelled, OrderStatus::Sent).is_err());
/// ```
pub fn plan_transition(order_id: &str, from: OrderStatus, to: OrderStatus) -> CoreResult<TransitionEffect> {
    use OrderStatus::*;

    let effect = match (from, to) {
        (Completed | Cancelled, _) => None,
        (_, Cancelled) => Some(TransitionEffect::Cancel),
        (_, Completed) => Some(TransitionEffect::Complete),
        (a, b) if a == b => Some(TransitionEffect::MetadataOnly),
        (Processing, Confirmed) | (Confirmed, Sent) => Some(TransitionEffect::Advance),
        _ => None,
    };

    effect.ok_or_else(|| CoreError::invalid_transition(order_id, from, to))
}

/// Convenience predicate over [`plan_transition`].
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    plan_transition("", from, to).is_ok()
}

/// Admin-supplied details accompanying a transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransitionMetadata {
    pub courier_name: Option<String>,
    pub tracking_number: Option<String>,
    /// Record of the out-of-band payment advice.
    pub payment_note: Option<String>,
}

impl TransitionMetadata {
    /// Trims fields, drops blanks and enforces the note length.
    pub fn normalized(&self) -> CoreResult<TransitionMetadata> {
        Ok(TransitionMetadata {
            courier_name: non_blank(self.courier_name.as_deref()),
            tracking_number: non_blank(self.tracking_number.as_deref()),
            payment_note: validate_note("payment note", self.payment_note.as_deref())?,
        })
    }
}

// =============================================================================
// Auto-completion
// =============================================================================

/// Whether an order is old enough to be auto-completed.
pub fn is_stale(order: &Order, now: DateTime<Utc>, after_days: i64) -> bool {
    !order.status.is_terminal() && order.created_at <= now - Duration::days(after_days)
}

// =============================================================================
// Unit Tests
// =============================================================================
