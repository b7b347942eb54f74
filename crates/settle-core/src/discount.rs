//! # Discount Resolution
//!
//! Computes the stacked discount for a cart subtotal from an optional promo
//! code and the active sitewide promotion.
//!
//! ## Resolution Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Discount Resolution                                 │
//! │                                                                         │
//! │  subtotal ──┬──► promo code?  ──► Invalid? Expired? BelowMinimum?       │
//! │             │                     Exhausted?  ──► promo_discount        │
//! │             │                                                           │
//! │             └──► promotions[] ──► active, in window, not exhausted      │
//! │                                   most recent start_at wins             │
//! │                                   ──► promotion_discount                │
//! │                                                                         │
//! │  Stacking clamp (promotion is reduced first):                           │
//! │    promo     = min(subtotal, raw_promo)                                 │
//! │    promotion = min(subtotal - promo, raw_promotion)                     │
//! │    total     = subtotal - promo - promotion        (always >= 0)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```text
//! subtotal 100.00, code 10% off, promotion 5.00 off
//!   promo      = floor(10000 * 10 / 100) = 1000
//!   promotion  = min(10000 - 1000, 500)  = 500
//!   total      = 8500
//! ```
//!
//! Everything here is pure. The caller loads the code and promotions
//! inside the transaction that will persist the order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{DiscountType, PromoCode, Promotion};

// =============================================================================
// Discount Terms
// =============================================================================

/// The `(type, value)` pair shared by promo codes and promotions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscountTerms {
    pub discount_type: DiscountType,
    pub discount_value: i64,
}

impl DiscountTerms {
    /// Raw discount against `subtotal`, capped at the subtotal.
    ///
    /// ```rust
    /// use settle_core::discount::DiscountTerms;
    /// use settle_core::money::Money;
    /// use settle_core::types::DiscountType;
    ///
    /// let ten_pct = DiscountTerms { discount_type: DiscountType::Percentage, discount_value: 10 };
    /// assert_eq!(ten_pct.amount_for(Money::from_cents(10000)).cents(), 1000);
    ///
    /// let fixed = DiscountTerms { discount_type: DiscountType::Fixed, discount_value: 500 };
    /// assert_eq!(fixed.amount_for(Money::from_cents(300)).cents(), 300);
    /// ```
    pub fn amount_for(&self, subtotal: Money) -> Money {
        let raw = match self.discount_type {
            DiscountType::Percentage => subtotal.percent_floor(self.discount_value),
            DiscountType::Fixed => Money::from_cents(self.discount_value),
        };
        raw.clamp_non_negative().min(subtotal.clamp_non_negative())
    }
}

// =============================================================================
// Usage Window
// =============================================================================

/// A discount bounded by a time window and an optional usage cap.
pub trait UsageWindow {
    fn start_at(&self) -> DateTime<Utc>;
    fn end_at(&self) -> DateTime<Utc>;
    fn max_usage(&self) -> Option<i64>;
    fn completed_usage_count(&self) -> i64;
    fn terms(&self) -> DiscountTerms;

    /// Inclusive on both ends: `[start_at, end_at]`.
    fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_at() <= now && now <= self.end_at()
    }

    /// True once completed usage reached the cap.
    fn is_exhausted(&self) -> bool {
        self.max_usage()
            .is_some_and(|max| self.completed_usage_count() >= max)
    }

    /// Remaining completions before the cap, `None` when unlimited.
    fn remaining_usage(&self) -> Option<i64> {
        self.max_usage()
            .map(|max| (max - self.completed_usage_count()).max(0))
    }
}

impl UsageWindow for PromoCode {
    fn start_at(&self) -> DateTime<Utc> {
        self.start_at
    }
    fn end_at(&self) -> DateTime<Utc> {
        self.end_at
    }
    fn max_usage(&self) -> Option<i64> {
        self.max_usage
    }
    fn completed_usage_count(&self) -> i64 {
        self.completed_usage_count
    }
    fn terms(&self) -> DiscountTerms {
        DiscountTerms {
            discount_type: self.discount_type,
            discount_value: self.discount_value,
        }
    }
}

impl UsageWindow for Promotion {
    fn start_at(&self) -> DateTime<Utc> {
        self.start_at
    }
    fn end_at(&self) -> DateTime<Utc> {
        self.end_at
    }
    fn max_usage(&self) -> Option<i64> {
        self.max_usage
    }
    fn completed_usage_count(&self) -> i64 {
        self.completed_usage_count
    }
    fn terms(&self) -> DiscountTerms {
        DiscountTerms {
            discount_type: self.discount_type,
            discount_value: self.discount_value,
        }
    }
}

// =============================================================================
// Breakdown
// =============================================================================

/// The resolved discount. Persisted verbatim onto the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiscountBreakdown {
    pub subtotal_cents: i64,
    pub promo_code_id: Option<String>,
    pub promo_code_discount_cents: i64,
    pub promotion_id: Option<String>,
    pub promotion_discount_cents: i64,
    pub total_cents: i64,
}

impl DiscountBreakdown {
    /// A breakdown with no discounts applied.
    pub fn undiscounted(subtotal: Money) -> Self {
        DiscountBreakdown {
            subtotal_cents: subtotal.cents(),
            promo_code_id: None,
            promo_code_discount_cents: 0,
            promotion_id: None,
            promotion_discount_cents: 0,
            total_cents: subtotal.clamp_non_negative().cents(),
        }
    }

    pub fn total_discount(&self) -> Money {
        Money::from_cents(self.promo_code_discount_cents + self.promotion_discount_cents)
    }
}

// =============================================================================
// Promo Code Eligibility
// =============================================================================

/// Checks a looked-up promo code against the cart.
///
/// `entered` is what the customer typed; `found` is the row matched
/// case-insensitively (or `None`). Checks run in a fixed order so the
/// customer always sees the same reason for the same code:
///
/// ```text
/// not found / inactive ──► PromoCodeInvalid
/// outside window       ──► PromoCodeExpired
/// subtotal < minimum   ──► PromoCodeBelowMinimum
/// usage cap reached    ──► PromoCodeExhausted
/// ```
pub fn check_promo_code<'a>(
    entered: &str,
    found: Option<&'a PromoCode>,
    subtotal: Money,
    now: DateTime<Utc>,
) -> CoreResult<&'a PromoCode> {
    let display = entered.trim().to_uppercase();

    let promo = match found {
        Some(promo) if promo.is_active => promo,
        _ => return Err(CoreError::PromoCodeInvalid(display)),
    };

    if !promo.is_within_window(now) {
        return Err(CoreError::PromoCodeExpired(promo.code.clone()));
    }

    if let Some(min_order_cents) = promo.min_order_cents {
        if subtotal.cents() < min_order_cents {
            return Err(CoreError::PromoCodeBelowMinimum {
                code: promo.code.clone(),
                min_order_cents,
                subtotal_cents: subtotal.cents(),
            });
        }
    }

    if promo.is_exhausted() {
        return Err(CoreError::PromoCodeExhausted(promo.code.clone()));
    }

    Ok(promo)
}

// =============================================================================
// Promotion Selection
// =============================================================================

/// Picks the sitewide promotion in effect at `now`.
///
/// Candidates must be active, inside their window and not exhausted. Among
/// overlapping candidates the most recent `start_at` wins; ties fall back to
/// the most recently created, then the greatest id, so the choice never
/// depends on input order.
pub fn select_active_promotion(promotions: &[Promotion], now: DateTime<Utc>) -> Option<&Promotion> {
    promotions
        .iter()
        .filter(|p| p.is_active && p.is_within_window(now) && !p.is_exhausted())
        .max_by(|a, b| compare_promotion_precedence(a, b))
}

fn compare_promotion_precedence(a: &Promotion, b: &Promotion) -> Ordering {
    a.start_at
        .cmp(&b.start_at)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

// =============================================================================
// Stacking
// =============================================================================

/// Stacks an eligible promo code and promotion onto `subtotal`.
///
/// Callers pass only discounts that already passed eligibility.
pub fn stack_discounts(
    subtotal: Money,
    promo_code: Option<&PromoCode>,
    promotion: Option<&Promotion>,
) -> DiscountBreakdown {
    let base = subtotal.clamp_non_negative();

    let promo_discount = promo_code
        .map(|p| p.terms().amount_for(base))
        .unwrap_or_default();

    // The promotion absorbs any overlap so the customer's code is preserved.
    let remaining = base - promo_discount;
    let promotion_discount = promotion
        .map(|p| p.terms().amount_for(base).min(remaining))
        .unwrap_or_default();

    let total = (base - promo_discount - promotion_discount).clamp_non_negative();

    DiscountBreakdown {
        subtotal_cents: subtotal.cents(),
        promo_code_id: promo_code.map(|p| p.id.clone()),
        promo_code_discount_cents: promo_discount.cents(),
        promotion_id: promotion.map(|p| p.id.clone()),
        promotion_discount_cents: promotion_discount.cents(),
        total_cents: total.cents(),
    }
}

/// Full resolution: eligibility of the entered code, promotion selection and
/// stacking.
///
/// ## Arguments
/// * `entered_code` - code as typed by the customer, `None` when blank
/// * `found_code` - row matched case-insensitively for `entered_code`
/// * `promotions` - candidate promotions (any state; filtered here)
pub fn resolve_discount(
    subtotal: Money,
    entered_code: Option<&str>,
    found_code: Option<&PromoCode>,
    promotions: &[Promotion],
    now: DateTime<Utc>,
) -> CoreResult<DiscountBreakdown> {
    let promo_code = match entered_code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(entered) => Some(check_promo_code(entered, found_code, subtotal, now)?),
        None => None,
    };

    let promotion = select_active_promotion(promotions, now);

    Ok(stack_discounts(subtotal, promo_code, promotion))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn promo(code: &str, discount_type: DiscountType, value: i64) -> PromoCode {
        let now = Utc::now();
        PromoCode {
            id: format!("promo-{}", code.to_lowercase()),
            code: code.to_string(),
            description: None,
            discount_type,
            discount_value: value,
            min_order_cents: None,
            start_at: now - Duration::days(1),
            end_at: now + Duration::days(1),
            max_usage: None,
            completed_usage_count: 0,
            order_usage_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn promotion(id: &str, discount_type: DiscountType, value: i64, started_hours_ago: i64) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: id.to_string(),
            name: format!("Promotion {}", id),
            description: None,
            discount_type,
            discount_value: value,
            start_at: now - Duration::hours(started_hours_ago),
            end_at: now + Duration::days(1),
            max_usage: None,
            completed_usage_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_percentage_code_and_fixed_promotion_stack() {
        let code = promo("SAVE10", DiscountType::Percentage, 10);
        let promos = vec![promotion("p1", DiscountType::Fixed, 500, 2)];

        let breakdown = resolve_discount(
            Money::from_cents(10000),
            Some("save10"),
            Some(&code),
            &promos,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(breakdown.promo_code_discount_cents, 1000);
        assert_eq!(breakdown.promotion_discount_cents, 500);
        assert_eq!(breakdown.total_cents, 8500);
        assert_eq!(breakdown.promo_code_id.as_deref(), Some("promo-save10"));
        assert_eq!(breakdown.promotion_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_total_clamps_to_zero_and_promotion_reduced_first() {
        let code = promo("BIG", DiscountType::Fixed, 250);
        let promos = vec![promotion("p1", DiscountType::Percentage, 100, 1)];

        let breakdown =
            resolve_discount(Money::from_cents(300), Some("BIG"), Some(&code), &promos, Utc::now())
                .unwrap();

        assert_eq!(breakdown.promo_code_discount_cents, 250);
        assert_eq!(breakdown.promotion_discount_cents, 50);
        assert_eq!(breakdown.total_cents, 0);
    }

    #[test]
    fn test_fixed_code_larger_than_subtotal_is_capped() {
        let code = promo("HUGE", DiscountType::Fixed, 5000);
        let promos = vec![promotion("p1", DiscountType::Fixed, 500, 1)];

        let breakdown =
            resolve_discount(Money::from_cents(300), Some("HUGE"), Some(&code), &promos, Utc::now())
                .unwrap();

        assert_eq!(breakdown.promo_code_discount_cents, 300);
        assert_eq!(breakdown.promotion_discount_cents, 0);
        assert_eq!(breakdown.total_cents, 0);
    }

    #[test]
    fn test_no_discounts() {
        let breakdown =
            resolve_discount(Money::from_cents(4200), None, None, &[], Utc::now()).unwrap();
        assert_eq!(breakdown, DiscountBreakdown::undiscounted(Money::from_cents(4200)));
    }

    #[test]
    fn test_blank_code_is_ignored() {
        let breakdown =
            resolve_discount(Money::from_cents(4200), Some("   "), None, &[], Utc::now()).unwrap();
        assert_eq!(breakdown.total_cents, 4200);
    }

    #[test]
    fn test_promo_check_order() {
        let now = Utc::now();
        let subtotal = Money::from_cents(1000);

        let err = check_promo_code("nope", None, subtotal, now).unwrap_err();
        assert!(matches!(err, CoreError::PromoCodeInvalid(ref c) if c == "NOPE"));

        let mut inactive = promo("OFF", DiscountType::Fixed, 100);
        inactive.is_active = false;
        let err = check_promo_code("OFF", Some(&inactive), subtotal, now).unwrap_err();
        assert!(matches!(err, CoreError::PromoCodeInvalid(_)));

        // Expired and below minimum and exhausted: expiry reported first
        let mut everything_wrong = promo("LATE", DiscountType::Fixed, 100);
        everything_wrong.end_at = now - Duration::hours(1);
        everything_wrong.min_order_cents = Some(5000);
        everything_wrong.max_usage = Some(1);
        everything_wrong.completed_usage_count = 1;
        let err = check_promo_code("LATE", Some(&everything_wrong), subtotal, now).unwrap_err();
        assert!(matches!(err, CoreError::PromoCodeExpired(_)));

        everything_wrong.end_at = now + Duration::hours(1);
        let err = check_promo_code("LATE", Some(&everything_wrong), subtotal, now).unwrap_err();
        assert!(matches!(
            err,
            CoreError::PromoCodeBelowMinimum { min_order_cents: 5000, subtotal_cents: 1000, .. }
        ));

        everything_wrong.min_order_cents = Some(1000);
        let err = check_promo_code("LATE", Some(&everything_wrong), subtotal, now).unwrap_err();
        assert!(matches!(err, CoreError::PromoCodeExhausted(_)));
    }

    #[test]
    fn test_promo_not_yet_started_is_expired() {
        let now = Utc::now();
        let mut future = promo("SOON", DiscountType::Fixed, 100);
        future.start_at = now + Duration::hours(1);
        let err = check_promo_code("SOON", Some(&future), Money::from_cents(1000), now).unwrap_err();
        assert!(matches!(err, CoreError::PromoCodeExpired(_)));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let p = promo("EDGE", DiscountType::Fixed, 100);
        assert!(p.is_within_window(p.start_at));
        assert!(p.is_within_window(p.end_at));
        assert!(!p.is_within_window(p.end_at + Duration::seconds(1)));
    }

    #[test]
    fn test_select_most_recent_start() {
        let now = Utc::now();
        let older = promotion("older", DiscountType::Fixed, 100, 48);
        let newer = promotion("newer", DiscountType::Fixed, 200, 2);

        let promos = vec![newer.clone(), older.clone()];
        assert_eq!(select_active_promotion(&promos, now).unwrap().id, "newer");

        let promos = vec![older, newer];
        assert_eq!(select_active_promotion(&promos, now).unwrap().id, "newer");
    }

    #[test]
    fn test_select_skips_exhausted_inactive_and_out_of_window() {
        let now = Utc::now();
        let fallback = promotion("fallback", DiscountType::Fixed, 100, 48);

        let mut exhausted = promotion("exhausted", DiscountType::Fixed, 200, 1);
        exhausted.max_usage = Some(3);
        exhausted.completed_usage_count = 3;

        let mut inactive = promotion("inactive", DiscountType::Fixed, 300, 1);
        inactive.is_active = false;

        let mut future = promotion("future", DiscountType::Fixed, 400, 0);
        future.start_at = now + Duration::hours(2);

        let promos = vec![exhausted, inactive, future, fallback];
        assert_eq!(select_active_promotion(&promos, now).unwrap().id, "fallback");
    }

    #[test]
    fn test_select_tie_is_deterministic() {
        let now = Utc::now();
        let mut a = promotion("a", DiscountType::Fixed, 100, 5);
        let mut b = promotion("b", DiscountType::Fixed, 100, 5);
        b.start_at = a.start_at;
        b.created_at = a.created_at;
        a.created_at = b.created_at;

        let forward = vec![a.clone(), b.clone()];
        let backward = vec![b, a];
        assert_eq!(select_active_promotion(&forward, now).unwrap().id, "b");
        assert_eq!(select_active_promotion(&backward, now).unwrap().id, "b");
    }

    #[test]
    fn test_remaining_usage() {
        let mut p = promo("CAP", DiscountType::Fixed, 100);
        assert_eq!(p.remaining_usage(), None);
        p.max_usage = Some(5);
        p.completed_usage_count = 3;
        assert_eq!(p.remaining_usage(), Some(2));
        assert!(!p.is_exhausted());
        p.completed_usage_count = 5;
        assert!(p.is_exhausted());
    }
}
