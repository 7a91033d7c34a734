//! Payment records.
//!
//! A payment belongs to exactly one owner: the order it opens (`Initial`) or
//! the subscription it renews (`Monthly`). Status moves `pending → success`
//! on a verified gateway callback, `pending → failed` when its order is
//! cancelled, and `success → refunded` out of band.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{RentalError, RentalResult, TransitionError};

/// Payment method recorded on rows settled through the gateway callback.
pub const GATEWAY_PAYMENT_METHOD: &str = "razorpay";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> RentalResult<Self> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(RentalError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

pub fn check_transition(from: PaymentStatus, to: PaymentStatus) -> Result<(), TransitionError> {
    use PaymentStatus::*;
    match (from, to) {
        (Pending, Success | Failed) | (Success, Refunded) => Ok(()),
        _ => Err(TransitionError {
            entity: "payment",
            from: from.as_str(),
            to: to.as_str(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Initial,
    Monthly,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Initial => "initial",
            PaymentType::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> RentalResult<Self> {
        match s {
            "initial" => Ok(PaymentType::Initial),
            "monthly" => Ok(PaymentType::Monthly),
            other => Err(RentalError::Validation(format!(
                "unknown payment type: {other}"
            ))),
        }
    }

    /// Capitalised label used in customer-facing text.
    pub fn label(&self) -> &'static str {
        match self {
            PaymentType::Initial => "Initial",
            PaymentType::Monthly => "Monthly",
        }
    }
}

/// What a gateway callback settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentTarget {
    Initial { order_id: i64 },
    Monthly { subscription_id: i64 },
}

impl PaymentTarget {
    pub fn payment_type(&self) -> PaymentType {
        match self {
            PaymentTarget::Initial { .. } => PaymentType::Initial,
            PaymentTarget::Monthly { .. } => PaymentType::Monthly,
        }
    }
}

/// Receipt handed to the gateway when opening an initial checkout.
pub fn initial_receipt(order_id: i64) -> String {
    format!("order_{order_id}")
}

/// Monthly receipts carry the billing date they settle, so every cycle
/// opens its own gateway order.
pub fn monthly_receipt(subscription_id: i64, billing_date: DateTime<Utc>) -> String {
    format!("subscription_{subscription_id}_{}", billing_date.format("%Y%m%d"))
}

pub fn monthly_invoice_number(subscription_id: i64, billing_date: DateTime<Utc>) -> String {
    format!("INV-M-{}-{}", billing_date.format("%Y%m%d"), subscription_id)
}

/// Audit blob stored on a settled payment row.
pub fn settlement_details(order_ref: &str, payment_ref: &str, signature: &str) -> Value {
    json!({
        "gateway_order_ref": order_ref,
        "gateway_payment_ref": payment_ref,
        "signature": signature,
    })
}

/// Blob stored on a pending row once a checkout has been opened.
pub fn checkout_details(order_ref: &str) -> Value {
    json!({ "gateway_order_ref": order_ref })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn payment_transitions() {
        use PaymentStatus::*;
        assert!(check_transition(Pending, Success).is_ok());
        assert!(check_transition(Pending, Failed).is_ok());
        assert!(check_transition(Success, Refunded).is_ok());
        assert!(check_transition(Success, Pending).is_err());
        assert!(check_transition(Failed, Success).is_err());
        assert!(check_transition(Refunded, Refunded).is_err());
    }

    #[test]
    fn receipts_and_types() {
        let t = PaymentTarget::Initial { order_id: 5 };
        assert_eq!(initial_receipt(5), "order_5");
        assert_eq!(t.payment_type(), PaymentType::Initial);
        let m = PaymentTarget::Monthly { subscription_id: 9 };
        assert_eq!(m.payment_type().label(), "Monthly");
    }

    #[test]
    fn monthly_receipt_changes_every_cycle() {
        let jan = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2025, 2, 15, 9, 0, 0).unwrap();
        assert_eq!(monthly_receipt(9, jan), "subscription_9_20250115");
        assert_ne!(monthly_receipt(9, jan), monthly_receipt(9, feb));
    }

    #[test]
    fn monthly_invoice_uses_billing_date() {
        let d = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(monthly_invoice_number(3, d), "INV-M-20250131-3");
    }

    #[test]
    fn settlement_details_carry_refs() {
        let v = settlement_details("order_abc", "pay_xyz", "deadbeef");
        assert_eq!(v["gateway_order_ref"], "order_abc");
        assert_eq!(v["gateway_payment_ref"], "pay_xyz");
    }
}
