//! Order state machine.
//!
//! ```text
//!   create()
//!   ──────► Pending ──► Rejected (term.)
//!              │
//!              ├──────► Cancelled (term.) ◄── any non-terminal state
//!              │
//!              ▼
//!           Approved ─► InTransit ─► Delivered ─► Installed ─► Completed (term.)
//!              └──────────┴────────────┴────────────┴──(forward skips allowed)
//! ```
//!
//! Approval is the handoff point: the transaction that moves an order to
//! `Approved` also creates its subscription. Asking to approve an order that
//! is already approved is a [`RentalError::Conflict`] rather than an illegal
//! transition, so concurrent approvers get a distinguishable answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RentalError, RentalResult, TransitionError};

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Approved,
    Rejected,
    InTransit,
    Delivered,
    Installed,
    Cancelled,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Approved => "approved",
            OrderStatus::Rejected => "rejected",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Installed => "installed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Completed => "completed",
        }
    }

    /// The status set is closed: unknown names are rejected as
    /// `Validation` here instead of reaching the transition guard.
    pub fn parse(s: &str) -> RentalResult<Self> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "approved" => Ok(OrderStatus::Approved),
            "rejected" => Ok(OrderStatus::Rejected),
            "in_transit" => Ok(OrderStatus::InTransit),
            "delivered" => Ok(OrderStatus::Delivered),
            "installed" => Ok(OrderStatus::Installed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "completed" => Ok(OrderStatus::Completed),
            other => Err(RentalError::Validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected | OrderStatus::Cancelled | OrderStatus::Completed
        )
    }

    /// Position along the fulfillment chain; `None` outside of it.
    fn fulfillment_rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Approved => Some(0),
            OrderStatus::InTransit => Some(1),
            OrderStatus::Delivered => Some(2),
            OrderStatus::Installed => Some(3),
            OrderStatus::Completed => Some(4),
            _ => None,
        }
    }
}

/// Pure transition table.
pub fn check_transition(from: OrderStatus, to: OrderStatus) -> Result<(), TransitionError> {
    use OrderStatus::*;

    let legal = match (from, to) {
        (Pending, Approved | Rejected | Cancelled) => true,
        (f, Cancelled) => !f.is_terminal(),
        (f, t) => match (f.fulfillment_rank(), t.fulfillment_rank()) {
            (Some(a), Some(b)) => b > a,
            _ => false,
        },
    };

    if legal {
        Ok(())
    } else {
        Err(TransitionError {
            entity: "order",
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

/// Guard applied by `UpdateStatus` after the order row is locked.
pub fn guard_status_update(from: OrderStatus, to: OrderStatus) -> RentalResult<()> {
    if from == OrderStatus::Approved && to == OrderStatus::Approved {
        return Err(RentalError::Conflict("order is already approved".into()));
    }
    check_transition(from, to)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Product prices captured onto the order at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub monthly_rent: i64,
    pub security_deposit: i64,
    pub installation_fee: i64,
}

impl PriceSnapshot {
    /// First month's rent plus the one-off deposit and installation fee.
    pub fn total_initial_amount(&self) -> RentalResult<i64> {
        self.security_deposit
            .checked_add(self.installation_fee)
            .and_then(|v| v.checked_add(self.monthly_rent))
            .ok_or_else(|| RentalError::Validation("initial amount overflows".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub product_id: i64,
    pub franchise_id: i64,
    pub shipping_address: String,
    pub billing_address: String,
    /// Months.
    pub rental_duration: i32,
    pub notes: Option<String>,
}

impl OrderRequest {
    pub fn validate(&self) -> RentalResult<()> {
        if self.rental_duration < 1 {
            return Err(RentalError::Validation(
                "rental_duration must be at least one month".into(),
            ));
        }
        if self.shipping_address.trim().is_empty() {
            return Err(RentalError::Validation("shipping_address is required".into()));
        }
        if self.billing_address.trim().is_empty() {
            return Err(RentalError::Validation("billing_address is required".into()));
        }
        Ok(())
    }
}

pub fn initial_invoice_number(order_id: i64, at: DateTime<Utc>) -> String {
    format!("INV-{}-{}", at.format("%Y%m%d"), order_id)
}

/// Appends an operator note, keeping earlier notes.
pub fn append_note(existing: Option<&str>, note: &str) -> String {
    match existing {
        Some(prev) if !prev.is_empty() => format!("{prev} | {note}"),
        _ => note.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use OrderStatus::*;

    #[test]
    fn pending_branches() {
        assert!(check_transition(Pending, Approved).is_ok());
        assert!(check_transition(Pending, Rejected).is_ok());
        assert!(check_transition(Pending, Cancelled).is_ok());
        assert!(check_transition(Pending, InTransit).is_err());
        assert!(check_transition(Pending, Completed).is_err());
    }

    #[test]
    fn fulfillment_only_moves_forward() {
        assert!(check_transition(Approved, InTransit).is_ok());
        assert!(check_transition(Approved, Installed).is_ok());
        assert!(check_transition(Delivered, Completed).is_ok());
        assert!(check_transition(Installed, Delivered).is_err());
        assert!(check_transition(InTransit, Approved).is_err());
    }

    #[test]
    fn terminal_states_are_closed() {
        for from in [Rejected, Cancelled, Completed] {
            assert!(from.is_terminal());
            for to in [Pending, Approved, InTransit, Cancelled, Completed] {
                assert!(check_transition(from, to).is_err(), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn any_live_state_can_cancel() {
        for from in [Pending, Approved, InTransit, Delivered, Installed] {
            assert!(check_transition(from, Cancelled).is_ok());
        }
    }

    #[test]
    fn double_approval_is_conflict() {
        let err = guard_status_update(Approved, Approved).unwrap_err();
        assert_eq!(err.kind(), "CONFLICT");
        let err = guard_status_update(Rejected, Approved).unwrap_err();
        assert_eq!(err.kind(), "INVALID_STATE");
    }

    #[test]
    fn unknown_status_is_validation_error() {
        assert_eq!(OrderStatus::parse("shipped").unwrap_err().kind(), "VALIDATION_ERROR");
        assert_eq!(OrderStatus::parse("in_transit").unwrap(), InTransit);
    }

    #[test]
    fn total_is_sum_of_snapshot() {
        let p = PriceSnapshot {
            monthly_rent: 50,
            security_deposit: 20,
            installation_fee: 10,
        };
        assert_eq!(p.total_initial_amount().unwrap(), 80);
    }

    #[test]
    fn total_overflow_is_rejected() {
        let p = PriceSnapshot {
            monthly_rent: i64::MAX,
            security_deposit: 1,
            installation_fee: 0,
        };
        assert!(p.total_initial_amount().is_err());
    }

    #[test]
    fn request_validation() {
        let mut req = OrderRequest {
            product_id: 1,
            franchise_id: 1,
            shipping_address: "12 Lake Rd".into(),
            billing_address: "12 Lake Rd".into(),
            rental_duration: 12,
            notes: None,
        };
        assert!(req.validate().is_ok());
        req.rental_duration = 0;
        assert!(req.validate().is_err());
        req.rental_duration = 6;
        req.billing_address = "  ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn invoice_and_notes_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap();
        assert_eq!(initial_invoice_number(42, at), "INV-20240309-42");
        assert_eq!(append_note(None, "first"), "first");
        assert_eq!(append_note(Some("first"), "second"), "first | second");
        assert_eq!(append_note(Some(""), "second"), "second");
    }
}
