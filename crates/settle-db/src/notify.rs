//! # Notifications
//!
//! Hand-off to the external notification collaborator (email, WhatsApp).
//!
//! ```text
//! engine operation ──► COMMIT ──► deliver(notifier, event)
//!                                      │
//!                                      ├── Ok   ──► debug!
//!                                      └── Err  ──► warn!  (never returned)
//! ```
//!
//! Notifications are sent only after the transaction commits, so a
//! rolled-back operation never notifies and a failed notification never
//! rolls anything back.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;
use tracing::{debug, info, warn};

use settle_core::{OrderStatus, RedemptionStatus};

/// Events the engine reports to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    OrderPlaced {
        order_id: String,
        user_id: String,
        total_cents: i64,
    },
    OrderStatusChanged {
        order_id: String,
        user_id: String,
        status: OrderStatus,
    },
    RedemptionStatusChanged {
        redemption_id: String,
        user_id: String,
        status: RedemptionStatus,
    },
}

impl Notification {
    pub fn user_id(&self) -> &str {
        match self {
            Notification::OrderPlaced { user_id, .. }
            | Notification::OrderStatusChanged { user_id, .. }
            | Notification::RedemptionStatusChanged { user_id, .. } => user_id,
        }
    }
}

/// Delivery failure reported by a notifier.
#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// The notification collaborator.
#[async_trait]
pub trait Notifier: Debug + Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Default notifier: writes the event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(user_id = %notification.user_id(), ?notification, "Notification");
        Ok(())
    }
}

/// Delivers best-effort. Failures are logged and swallowed.
pub async fn deliver(notifier: &dyn Notifier, notification: Notification) {
    match notifier.notify(&notification).await {
        Ok(()) => debug!(?notification, "Notification delivered"),
        Err(err) => warn!(error = %err, ?notification, "Notification failed; continuing"),
    }
}
