//! Subscription lifecycle and schedule arithmetic.
//!
//! ```text
//!   approve(order)
//!   ──────► Active ◄──── resume ──── Paused
//!             │  └────── pause ───────►│
//!             ├──► Expired (term., external sweeper)
//!             └──► Cancelled (term.) ◄─┘
//! ```
//!
//! Pausing extends `end_date` by the planned pause length up front. Resuming
//! is a plain status flip: an early resume does not give the unused pause
//! time back, so repeated pause/resume cycles can lengthen a rental beyond
//! the time actually spent paused.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RentalError, RentalResult, TransitionError};

pub const DEFAULT_BILLING_INTERVAL_MONTHS: u32 = 1;
pub const DEFAULT_MAINTENANCE_INTERVAL_MONTHS: u32 = 3;

/// Maintenance note written onto every freshly created subscription.
pub const INITIAL_MAINTENANCE_NOTE: &str = "Initial setup complete";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> RentalResult<Self> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "paused" => Ok(SubscriptionStatus::Paused),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(RentalError::Validation(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

/// Transitions reachable through pause/resume/expiry. Customer cancellation
/// is unconditional and does not consult this table.
pub fn check_transition(
    from: SubscriptionStatus,
    to: SubscriptionStatus,
) -> Result<(), TransitionError> {
    use SubscriptionStatus::*;
    match (from, to) {
        (Active, Paused | Expired | Cancelled) | (Paused, Active | Cancelled) => Ok(()),
        _ => Err(TransitionError {
            entity: "subscription",
            from: from.as_str(),
            to: to.as_str(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Billing and maintenance cadence, in months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    pub billing_interval_months: u32,
    pub maintenance_interval_months: u32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            billing_interval_months: DEFAULT_BILLING_INTERVAL_MONTHS,
            maintenance_interval_months: DEFAULT_MAINTENANCE_INTERVAL_MONTHS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
    pub next_maintenance: DateTime<Utc>,
}

impl Schedule {
    /// Schedule for a subscription created at the approval instant `start`.
    pub fn from_approval(
        start: DateTime<Utc>,
        rental_duration_months: i32,
        policy: &LifecyclePolicy,
    ) -> RentalResult<Self> {
        let duration = u32::try_from(rental_duration_months)
            .ok()
            .filter(|m| *m >= 1)
            .ok_or_else(|| {
                RentalError::Validation(format!(
                    "rental_duration must be at least one month, got {rental_duration_months}"
                ))
            })?;

        Ok(Self {
            start_date: start,
            end_date: add_months(start, duration)?,
            next_billing_date: add_months(start, policy.billing_interval_months)?,
            next_maintenance: add_months(start, policy.maintenance_interval_months)?,
        })
    }
}

/// Calendar-aware month addition; month ends clamp (Jan 31 + 1 = Feb 28/29).
pub fn add_months(at: DateTime<Utc>, months: u32) -> RentalResult<DateTime<Utc>> {
    at.checked_add_months(Months::new(months))
        .ok_or_else(|| RentalError::Validation("date out of range".into()))
}

/// Next billing date after one successful monthly payment.
pub fn advance_billing(
    next_billing_date: DateTime<Utc>,
    policy: &LifecyclePolicy,
) -> RentalResult<DateTime<Utc>> {
    add_months(next_billing_date, policy.billing_interval_months)
}

/// New `end_date` for a pause starting at `now` and ending at `pause_end`.
pub fn extend_for_pause(
    end_date: DateTime<Utc>,
    now: DateTime<Utc>,
    pause_end: DateTime<Utc>,
) -> RentalResult<DateTime<Utc>> {
    if pause_end <= now {
        return Err(RentalError::Validation(
            "pause_end_date must be in the future".into(),
        ));
    }
    end_date
        .checked_add_signed(pause_end - now)
        .ok_or_else(|| RentalError::Validation("date out of range".into()))
}
