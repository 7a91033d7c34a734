//! Notification drafts derived from transitions.
//!
//! Drafts are plain values. Whoever executes a transition decides how each
//! draft is delivered: [`Fanout::critical`] drafts are written inside the
//! transition's transaction, [`Fanout::informational`] drafts are published
//! after commit and may be lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RentalError, RentalResult};
use crate::order::OrderStatus;
use crate::payment::PaymentType;
use crate::service::ServiceStatus;
use crate::subscription::SubscriptionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Order,
    Payment,
    Subscription,
    ServiceRequest,
    ServiceFeedback,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Order => "order",
            NotificationKind::Payment => "payment",
            NotificationKind::Subscription => "subscription",
            NotificationKind::ServiceRequest => "service_request",
            NotificationKind::ServiceFeedback => "service_feedback",
        }
    }

    pub fn parse(s: &str) -> RentalResult<Self> {
        match s {
            "order" => Ok(NotificationKind::Order),
            "payment" => Ok(NotificationKind::Payment),
            "subscription" => Ok(NotificationKind::Subscription),
            "service_request" => Ok(NotificationKind::ServiceRequest),
            "service_feedback" => Ok(NotificationKind::ServiceFeedback),
            other => Err(RentalError::Validation(format!(
                "unknown notification kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RelatedEntity {
    Order(i64),
    Payment(i64),
    Subscription(i64),
    ServiceRequest(i64),
}

impl RelatedEntity {
    pub fn type_str(&self) -> &'static str {
        match self {
            RelatedEntity::Order(_) => "order",
            RelatedEntity::Payment(_) => "payment",
            RelatedEntity::Subscription(_) => "subscription",
            RelatedEntity::ServiceRequest(_) => "service_request",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            RelatedEntity::Order(id)
            | RelatedEntity::Payment(id)
            | RelatedEntity::Subscription(id)
            | RelatedEntity::ServiceRequest(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: i64) -> Option<Self> {
        match kind {
            "order" => Some(RelatedEntity::Order(id)),
            "payment" => Some(RelatedEntity::Payment(id)),
            "subscription" => Some(RelatedEntity::Subscription(id)),
            "service_request" => Some(RelatedEntity::ServiceRequest(id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDraft {
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub related: Option<RelatedEntity>,
}

impl NotificationDraft {
    fn new(
        user_id: i64,
        title: &str,
        message: impl Into<String>,
        kind: NotificationKind,
        related: RelatedEntity,
    ) -> Self {
        Self {
            user_id,
            title: title.to_string(),
            message: message.into(),
            kind,
            related: Some(related),
        }
    }
}

/// Drafts produced by one transition, split by delivery guarantee.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fanout {
    pub critical: Vec<NotificationDraft>,
    pub informational: Vec<NotificationDraft>,
}

impl Fanout {
    pub fn critical(mut self, d: NotificationDraft) -> Self {
        self.critical.push(d);
        self
    }

    pub fn informational(mut self, d: NotificationDraft) -> Self {
        self.informational.push(d);
        self
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

pub fn order_placed(customer_id: i64, order_id: i64, product_name: &str) -> NotificationDraft {
    NotificationDraft::new(
        customer_id,
        "Order Placed Successfully",
        format!("Your order for {product_name} has been placed and is pending approval."),
        NotificationKind::Order,
        RelatedEntity::Order(order_id),
    )
}

pub fn order_status_message(status: OrderStatus) -> String {
    match status {
        OrderStatus::Approved => {
            "Your order has been approved. Your subscription is now active.".to_string()
        }
        OrderStatus::Rejected => {
            "Your order has been rejected. Please contact customer support for details."
                .to_string()
        }
        OrderStatus::Cancelled => "Your order has been cancelled.".to_string(),
        OrderStatus::InTransit => {
            "Your order is in transit and will be delivered soon.".to_string()
        }
        OrderStatus::Delivered => {
            "Your order has been delivered. Installation will be scheduled soon.".to_string()
        }
        OrderStatus::Installed => {
            "Your water purifier has been successfully installed.".to_string()
        }
        other => format!("Your order status has been updated to {}", other.as_str()),
    }
}

pub fn order_status_changed(customer_id: i64, order_id: i64, status: OrderStatus) -> NotificationDraft {
    NotificationDraft::new(
        customer_id,
        "Order Status Updated",
        order_status_message(status),
        NotificationKind::Order,
        RelatedEntity::Order(order_id),
    )
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

pub fn payment_succeeded(customer_id: i64, payment_id: i64, kind: PaymentType) -> NotificationDraft {
    NotificationDraft::new(
        customer_id,
        "Payment Successful",
        format!("{} payment has been processed successfully.", kind.label()),
        NotificationKind::Payment,
        RelatedEntity::Payment(payment_id),
    )
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

pub fn subscription_status_changed(
    customer_id: i64,
    subscription_id: i64,
    status: SubscriptionStatus,
) -> NotificationDraft {
    NotificationDraft::new(
        customer_id,
        "Subscription Updated",
        format!(
            "Your subscription status has been updated to {}",
            status.as_str()
        ),
        NotificationKind::Subscription,
        RelatedEntity::Subscription(subscription_id),
    )
}

pub fn auto_renew_changed(customer_id: i64, subscription_id: i64, enabled: bool) -> NotificationDraft {
    let verb = if enabled { "enabled" } else { "disabled" };
    NotificationDraft::new(
        customer_id,
        "Subscription Updated",
        format!("Auto-renewal has been {verb} for your subscription"),
        NotificationKind::Subscription,
        RelatedEntity::Subscription(subscription_id),
    )
}

pub fn subscription_cancelled(
    customer_id: i64,
    franchise_owner_id: Option<i64>,
    subscription_id: i64,
) -> Fanout {
    let mut out = Fanout::default().critical(NotificationDraft::new(
        customer_id,
        "Subscription Cancelled",
        "Your subscription has been cancelled.",
        NotificationKind::Subscription,
        RelatedEntity::Subscription(subscription_id),
    ));
    if let Some(owner) = franchise_owner_id {
        out = out.informational(NotificationDraft::new(
            owner,
            "Subscription Cancelled",
            "A customer has cancelled their subscription.",
            NotificationKind::Subscription,
            RelatedEntity::Subscription(subscription_id),
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// Service requests
// ---------------------------------------------------------------------------

pub fn service_request_created(
    customer_id: i64,
    franchise_owner_id: Option<i64>,
    request_id: i64,
) -> Fanout {
    let mut out = Fanout::default().critical(NotificationDraft::new(
        customer_id,
        "Service Request Created",
        "Your service request has been created and is pending assignment.",
        NotificationKind::ServiceRequest,
        RelatedEntity::ServiceRequest(request_id),
    ));
    if let Some(owner) = franchise_owner_id {
        out = out.informational(NotificationDraft::new(
            owner,
            "New Service Request",
            "A new service request has been created and needs your attention.",
            NotificationKind::ServiceRequest,
            RelatedEntity::ServiceRequest(request_id),
        ));
    }
    out
}

/// What changed in one service request update, for notification purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceChange {
    pub request_id: i64,
    pub customer_id: i64,
    pub new_status: Option<ServiceStatus>,
    pub assigned_agent: Option<i64>,
    pub scheduled_time: Option<DateTime<Utc>>,
}

pub fn service_request_updated(change: &ServiceChange) -> Fanout {
    let related = RelatedEntity::ServiceRequest(change.request_id);
    let mut out = Fanout::default();

    if let Some(status) = change.new_status {
        out = out.critical(NotificationDraft::new(
            change.customer_id,
            "Service Request Updated",
            format!(
                "Your service request status has been updated to {}.",
                status.as_str()
            ),
            NotificationKind::ServiceRequest,
            related,
        ));
    }

    if let Some(agent_id) = change.assigned_agent {
        out = out
            .critical(NotificationDraft::new(
                change.customer_id,
                "Service Agent Assigned",
                "A service agent has been assigned to your service request.",
                NotificationKind::ServiceRequest,
                related,
            ))
            .critical(NotificationDraft::new(
                agent_id,
                "New Service Assignment",
                format!("You have been assigned to service request #{}.", change.request_id),
                NotificationKind::ServiceRequest,
                related,
            ));
    }

    if let Some(at) = change.scheduled_time {
        out = out.critical(NotificationDraft::new(
            change.customer_id,
            "Service Visit Scheduled",
            format!(
                "Your service request has been scheduled for {}.",
                at.format("%Y-%m-%d %H:%M UTC")
            ),
            NotificationKind::ServiceRequest,
            related,
        ));
    }

    out
}

pub fn service_request_cancelled(customer_id: i64, agent_id: Option<i64>, request_id: i64) -> Fanout {
    let related = RelatedEntity::ServiceRequest(request_id);
    let mut out = Fanout::default().critical(NotificationDraft::new(
        customer_id,
        "Service Request Cancelled",
        "Your service request has been cancelled.",
        NotificationKind::ServiceRequest,
        related,
    ));
    if let Some(agent) = agent_id {
        out = out.critical(NotificationDraft::new(
            agent,
            "Service Request Cancelled",
            "A service request assigned to you has been cancelled by the customer.",
            NotificationKind::ServiceRequest,
            related,
        ));
    }
    out
}

pub fn feedback_received(agent_id: i64, request_id: i64, rating: i32) -> NotificationDraft {
    NotificationDraft::new(
        agent_id,
        "Service Feedback Received",
        format!("You received a {rating}-star rating for your service."),
        NotificationKind::ServiceFeedback,
        RelatedEntity::ServiceRequest(request_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn order_messages_keyed_by_status() {
        assert_eq!(
            order_status_message(OrderStatus::Approved),
            "Your order has been approved. Your subscription is now active."
        );
        assert_eq!(
            order_status_message(OrderStatus::Completed),
            "Your order status has been updated to completed"
        );
        let d = order_status_changed(7, 3, OrderStatus::InTransit);
        assert_eq!(d.user_id, 7);
        assert_eq!(d.related, Some(RelatedEntity::Order(3)));
        assert_eq!(d.kind, NotificationKind::Order);
    }

    #[test]
    fn payment_message_labels_type() {
        let d = payment_succeeded(7, 11, PaymentType::Monthly);
        assert_eq!(d.message, "Monthly payment has been processed successfully.");
        assert_eq!(d.related.map(|r| r.type_str()), Some("payment"));
    }

    #[test]
    fn owner_fyi_is_informational() {
        let f = subscription_cancelled(7, Some(20), 5);
        assert_eq!(f.critical.len(), 1);
        assert_eq!(f.informational.len(), 1);
        assert_eq!(f.informational[0].user_id, 20);

        let f = service_request_created(7, None, 9);
        assert_eq!(f.critical.len(), 1);
        assert!(f.informational.is_empty());
    }

    #[test]
    fn service_update_fans_out_per_change() {
        let change = ServiceChange {
            request_id: 9,
            customer_id: 7,
            new_status: Some(ServiceStatus::Assigned),
            assigned_agent: Some(30),
            scheduled_time: Some(Utc.with_ymd_and_hms(2024, 5, 2, 14, 0, 0).unwrap()),
        };
        let f = service_request_updated(&change);
        let users: Vec<i64> = f.critical.iter().map(|d| d.user_id).collect();
        assert_eq!(users, vec![7, 7, 30, 7]);
        assert_eq!(f.critical[2].message, "You have been assigned to service request #9.");
        assert!(f.critical[3].message.contains("2024-05-02 14:00 UTC"));
    }

    #[test]
    fn cancellation_notifies_assigned_agent() {
        let f = service_request_cancelled(7, Some(30), 9);
        assert_eq!(f.critical.len(), 2);
        let f = service_request_cancelled(7, None, 9);
        assert_eq!(f.critical.len(), 1);
    }

    #[test]
    fn feedback_message() {
        let d = feedback_received(30, 9, 4);
        assert_eq!(d.message, "You received a 4-star rating for your service.");
        assert_eq!(d.kind, NotificationKind::ServiceFeedback);
    }

    #[test]
    fn related_entity_parts() {
        let r = RelatedEntity::from_parts("service_request", 4).unwrap();
        assert_eq!(r, RelatedEntity::ServiceRequest(4));
        assert_eq!(r.id(), 4);
        assert!(RelatedEntity::from_parts("invoice", 4).is_none());
    }
}
