//! Service request workflow.
//!
//! ```text
//!   Pending ─► Assigned ─► Scheduled ─► InProgress ─► Completed (term.)
//!      │          │           │          (forward skips allowed)
//!      └──────────┴───────────┴──► Cancelled (term.)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RentalError, RentalResult, TransitionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    Assigned,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Assigned => "assigned",
            ServiceStatus::Scheduled => "scheduled",
            ServiceStatus::InProgress => "in_progress",
            ServiceStatus::Completed => "completed",
            ServiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> RentalResult<Self> {
        match s {
            "pending" => Ok(ServiceStatus::Pending),
            "assigned" => Ok(ServiceStatus::Assigned),
            "scheduled" => Ok(ServiceStatus::Scheduled),
            "in_progress" => Ok(ServiceStatus::InProgress),
            "completed" => Ok(ServiceStatus::Completed),
            "cancelled" => Ok(ServiceStatus::Cancelled),
            other => Err(RentalError::Validation(format!(
                "unknown service request status: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceStatus::Completed | ServiceStatus::Cancelled)
    }

    /// Cancellation is only possible before a visit has started.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Pending | ServiceStatus::Assigned | ServiceStatus::Scheduled
        )
    }

    fn rank(&self) -> Option<u8> {
        match self {
            ServiceStatus::Pending => Some(0),
            ServiceStatus::Assigned => Some(1),
            ServiceStatus::Scheduled => Some(2),
            ServiceStatus::InProgress => Some(3),
            ServiceStatus::Completed => Some(4),
            ServiceStatus::Cancelled => None,
        }
    }
}

pub fn check_transition(from: ServiceStatus, to: ServiceStatus) -> Result<(), TransitionError> {
    let legal = match to {
        ServiceStatus::Cancelled => from.is_cancellable(),
        _ => match (from.rank(), to.rank()) {
            (Some(a), Some(b)) => b > a,
            _ => false,
        },
    };
    if legal {
        Ok(())
    } else {
        Err(TransitionError {
            entity: "service request",
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUpdate {
    pub status: Option<ServiceStatus>,
    pub agent_id: Option<i64>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl ServiceUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.agent_id.is_none()
            && self.scheduled_time.is_none()
            && self.completion_time.is_none()
            && self.notes.is_none()
    }

    /// A customer's only lever on a request is to withdraw it.
    pub fn is_customer_withdrawal(&self) -> bool {
        self.status == Some(ServiceStatus::Cancelled)
            && self.agent_id.is_none()
            && self.scheduled_time.is_none()
            && self.completion_time.is_none()
            && self.notes.is_none()
    }
}

/// Status the request ends up in after `update` is applied to `current`.
///
/// Returns `None` when the status does not change. An explicit status must
/// be a legal edge; assigning an agent to a pending request promotes it to
/// `Assigned` when no explicit status was given.
pub fn resolve_next_status(
    current: ServiceStatus,
    update: &ServiceUpdate,
) -> RentalResult<Option<ServiceStatus>> {
    match update.status {
        Some(requested) if requested == current => Ok(None),
        Some(requested) => {
            check_transition(current, requested)?;
            Ok(Some(requested))
        }
        None if update.agent_id.is_some() && current == ServiceStatus::Pending => {
            Ok(Some(ServiceStatus::Assigned))
        }
        None => Ok(None),
    }
}

pub fn validate_rating(rating: i32) -> RentalResult<()> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(RentalError::Validation(format!(
            "rating must be between 1 and 5, got {rating}"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequestDraft {
    pub subscription_id: i64,
    pub request_type: String,
    pub description: String,
}

impl ServiceRequestDraft {
    pub fn validate(&self) -> RentalResult<()> {
        if self.request_type.trim().is_empty() {
            return Err(RentalError::Validation("request_type is required".into()));
        }
        if self.description.trim().is_empty() {
            return Err(RentalError::Validation("description is required".into()));
        }
        Ok(())
    }
}
