//! # Loyalty Rules
//!
//! Converts verified purchases into gift slots and governs the redemption
//! lifecycle.
//!
//! ## Eligibility
//! ```text
//! eligible_gifts = floor(total_purchases / T)
//!
//! total_purchases = 25, T = 10  ──► eligible 2
//! total_gifts     = 1           ──► one free slot, request allowed
//! total_gifts     = 2           ──► no slot until total_purchases hits 30
//! ```
//!
//! ## Redemption Lifecycle
//! ```text
//! PENDING ──► APPROVED ──► SHIPPED      (courier + tracking required)
//!    │
//!    └──────► REJECTED                  (slot and gift stock given back)
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::types::{Gift, RedemptionStatus, User};
use crate::validation::non_blank;

// =============================================================================
// Eligibility
// =============================================================================

/// `floor(total_purchases / threshold)`. A zero threshold grants nothing.
#[inline]
pub fn eligible_gifts(total_purchases: i64, threshold: i64) -> i64 {
    if threshold <= 0 || total_purchases <= 0 {
        return 0;
    }
    total_purchases / threshold
}

/// Snapshot of a user's standing, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LoyaltySummary {
    pub total_purchases: i64,
    pub total_gifts: i64,
    pub eligible_gifts: i64,
    /// Slots the user can still spend.
    pub available_slots: i64,
    /// Verified purchases needed to unlock the next slot.
    pub purchases_to_next_gift: i64,
}

impl LoyaltySummary {
    pub fn for_user(user: &User, threshold: i64) -> Self {
        let eligible = eligible_gifts(user.total_purchases, threshold);
        let next = if threshold > 0 {
            (eligible + 1) * threshold - user.total_purchases.max(0)
        } else {
            0
        };

        LoyaltySummary {
            total_purchases: user.total_purchases,
            total_gifts: user.total_gifts,
            eligible_gifts: eligible,
            available_slots: (eligible - user.total_gifts).max(0),
            purchases_to_next_gift: next,
        }
    }
}

/// Whether the user has an unspent gift slot.
pub fn has_free_slot(user: &User, threshold: i64) -> bool {
    eligible_gifts(user.total_purchases, threshold) > user.total_gifts
}

/// True iff the user has a free slot and some active gift has stock.
pub fn can_request_redemption(user: &User, threshold: i64, gifts: &[Gift]) -> bool {
    has_free_slot(user, threshold) && gifts.iter().any(|g| g.is_active && g.inventory > 0)
}

/// Fails with `GiftNotEligible` unless a request is allowed.
pub fn ensure_can_request(user: &User, threshold: i64, gifts: &[Gift]) -> CoreResult<()> {
    if can_request_redemption(user, threshold, gifts) {
        Ok(())
    } else {
        Err(CoreError::GiftNotEligible {
            eligible: eligible_gifts(user.total_purchases, threshold),
            redeemed: user.total_gifts,
        })
    }
}

/// Checks the chosen gift.
pub fn ensure_gift_available(gift: &Gift) -> CoreResult<()> {
    if !gift.is_active {
        return Err(CoreError::GiftUnavailable(gift.name.clone()));
    }
    if gift.inventory <= 0 {
        return Err(CoreError::GiftOutOfStock(gift.name.clone()));
    }
    Ok(())
}

// =============================================================================
// Delivery Details
// =============================================================================

/// Profile fields a gift cannot ship without, in display order.
pub fn missing_delivery_fields(user: &User) -> Vec<String> {
    let required = [
        ("phone_number", &user.phone_number),
        ("address_line1", &user.address_line1),
        ("city", &user.city),
        ("state", &user.state),
        ("postal_code", &user.postal_code),
        ("country", &user.country),
    ];

    required
        .iter()
        .filter(|(_, value)| non_blank(value.as_deref()).is_none())
        .map(|(name, _)| name.to_string())
        .collect()
}

pub fn ensure_delivery_details(user: &User) -> CoreResult<()> {
    let fields = missing_delivery_fields(user);
    if fields.is_empty() {
        Ok(())
    } else {
        Err(CoreError::DeliveryDetailsMissing { fields })
    }
}

// =============================================================================
// Redemption Transitions
// =============================================================================

/// Courier details for a shipped redemption.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CourierInfo {
    pub courier_name: String,
    pub tracking_number: String,
}

/// What a permitted redemption status change requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionEffect {
    Approve,
    /// Give back the user's slot and the reserved gift unit.
    Reject,
    Ship(CourierInfo),
}

/// Decides whether `from → to` is legal for a redemption.
///
/// ## Errors
/// - `InvalidRedemptionTransition` outside PENDING→APPROVED|REJECTED and
///   APPROVED→SHIPPED
/// - `CourierDetailsRequired` for SHIPPED without both courier fields
pub fn plan_redemption_transition(
    redemption_id: &str,
    from: RedemptionStatus,
    to: RedemptionStatus,
    courier: Option<&CourierInfo>,
) -> CoreResult<RedemptionEffect> {
    use RedemptionStatus::*;

    match (from, to) {
        (Pending, Approved) => Ok(RedemptionEffect::Approve),
        (Pending, Rejected) => Ok(RedemptionEffect::Reject),
        (Approved, Shipped) => {
            let courier_name = non_blank(courier.map(|c| c.courier_name.as_str()));
            let tracking_number = non_blank(courier.map(|c| c.tracking_number.as_str()));
            match (courier_name, tracking_number) {
                (Some(courier_name), Some(tracking_number)) => Ok(RedemptionEffect::Ship(CourierInfo {
                    courier_name,
                    tracking_number,
                })),
                _ => Err(CoreError::CourierDetailsRequired),
            }
        }
        _ => Err(CoreError::InvalidRedemptionTransition {
            redemption_id: redemption_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use chrono::Utc;

    fn user(total_purchases: i64, total_gifts: i64) -> User {
        let now = Utc::now();
        User {
            id: "u-1".to_string(),
            email: "amir@example.com".to_string(),
            name: Some("Amir".to_string()),
            role: Role::User,
            total_purchases,
            total_gifts,
            phone_number: Some("+60123456789".to_string()),
            address_line1: Some("12 Jalan Ampang".to_string()),
            address_line2: None,
            city: Some("Kuala Lumpur".to_string()),
            state: Some("WP".to_string()),
            postal_code: Some("50450".to_string()),
            country: Some("MY".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn gift(inventory: i64, is_active: bool) -> Gift {
        let now = Utc::now();
        Gift {
            id: "g-1".to_string(),
            name: "Tote Bag".to_string(),
            description: None,
            inventory,
            is_active,
            sort_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_eligibility_arithmetic() {
        let gifts = vec![gift(5, true)];

        let u = user(25, 1);
        assert_eq!(eligible_gifts(u.total_purchases, 10), 2);
        assert!(can_request_redemption(&u, 10, &gifts));

        let u = user(25, 2);
        assert!(!can_request_redemption(&u, 10, &gifts));

        let u = user(30, 2);
        assert!(can_request_redemption(&u, 10, &gifts));
    }

    #[test]
    fn test_zero_threshold_grants_nothing() {
        assert_eq!(eligible_gifts(100, 0), 0);
        assert_eq!(eligible_gifts(-3, 10), 0);
    }

    #[test]
    fn test_requires_gift_in_stock() {
        let u = user(10, 0);
        assert!(!can_request_redemption(&u, 10, &[gift(0, true)]));
        assert!(!can_request_redemption(&u, 10, &[gift(3, false)]));
        assert!(matches!(
            ensure_can_request(&u, 10, &[]),
            Err(CoreError::GiftNotEligible { eligible: 1, redeemed: 0 })
        ));
    }

    #[test]
    fn test_ensure_gift_available() {
        assert!(ensure_gift_available(&gift(1, true)).is_ok());
        assert!(matches!(ensure_gift_available(&gift(0, true)), Err(CoreError::GiftOutOfStock(_))));
        assert!(matches!(ensure_gift_available(&gift(5, false)), Err(CoreError::GiftUnavailable(_))));
    }

    #[test]
    fn test_summary() {
        let summary = LoyaltySummary::for_user(&user(25, 1), 10);
        assert_eq!(summary.eligible_gifts, 2);
        assert_eq!(summary.available_slots, 1);
        assert_eq!(summary.purchases_to_next_gift, 5);
    }

    #[test]
    fn test_missing_delivery_fields() {
        let mut u = user(10, 0);
        assert!(ensure_delivery_details(&u).is_ok());

        u.city = Some("  ".to_string());
        u.postal_code = None;
        assert_eq!(missing_delivery_fields(&u), vec!["city", "postal_code"]);
        assert!(matches!(
            ensure_delivery_details(&u),
            Err(CoreError::DeliveryDetailsMissing { .. })
        ));
    }

    #[test]
    fn test_redemption_transitions() {
        use RedemptionStatus::*;

        assert_eq!(
            plan_redemption_transition("r", Pending, Approved, None).unwrap(),
            RedemptionEffect::Approve
        );
        assert_eq!(
            plan_redemption_transition("r", Pending, Rejected, None).unwrap(),
            RedemptionEffect::Reject
        );

        let courier = CourierInfo {
            courier_name: " PosLaju ".to_string(),
            tracking_number: "EP123".to_string(),
        };
        match plan_redemption_transition("r", Approved, Shipped, Some(&courier)).unwrap() {
            RedemptionEffect::Ship(info) => assert_eq!(info.courier_name, "PosLaju"),
            other => panic!("unexpected effect {:?}", other),
        }

        assert!(matches!(
            plan_redemption_transition("r", Pending, Shipped, Some(&courier)),
            Err(CoreError::InvalidRedemptionTransition { .. })
        ));
        assert!(matches!(
            plan_redemption_transition("r", Rejected, Approved, None),
            Err(CoreError::InvalidRedemptionTransition { .. })
        ));
        assert!(matches!(
            plan_redemption_transition("r", Shipped, Shipped, Some(&courier)),
            Err(CoreError::InvalidRedemptionTransition { .. })
        ));
    }

    #[test]
    fn test_ship_requires_courier_details() {
        use RedemptionStatus::*;

        assert!(matches!(
            plan_redemption_transition("r", Approved, Shipped, None),
            Err(CoreError::CourierDetailsRequired)
        ));
        let blank_tracking = CourierInfo {
            courier_name: "PosLaju".to_string(),
            tracking_number: "  ".to_string(),
        };
        assert!(matches!(
            plan_redemption_transition("r", Approved, Shipped, Some(&blank_tracking)),
            Err(CoreError::CourierDetailsRequired)
        ));
    }
}
