//! Notification sink for assignment, pickup and expiry events.
//!
//! Delivery (SMS, email, push) is somebody else's job. The manager hands each
//! event to a sink after the state change is committed and the locker lock is
//! released; a failing sink is logged and never undoes the change.

use lockbay_core::Ticket;
use thiserror::Error;

/// What happened to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Package placed, ticket issued.
    Assigned,
    /// Locker opened with the correct passcode.
    PickedUp,
    /// Dwell time elapsed, package evicted.
    Expired,
}

/// Errors a sink may report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The sink could not be reached.
    #[error("notification sink unavailable: {reason}")]
    Unavailable {
        /// Description of the failure.
        reason: String,
    },
}

/// Receives ticket events. Fire-and-forget.
pub trait NotificationSink: Send + Sync {
    /// Deliver one event.
    fn notify(&self, ticket: &Ticket, kind: NotificationKind) -> Result<(), NotifyError>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn notify(&self, _ticket: &Ticket, _kind: NotificationKind) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Logs every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, ticket: &Ticket, kind: NotificationKind) -> Result<(), NotifyError> {
        tracing::info!(
            ticket_id = ticket.id,
            locker_id = ticket.locker_id,
            package_id = ticket.package_id,
            ?kind,
            "ticket event"
        );
        Ok(())
    }
}
