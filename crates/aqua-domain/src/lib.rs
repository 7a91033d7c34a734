//! aqua-domain
//!
//! Pure rental lifecycle rules: status enums and their transition tables,
//! capability checks, schedule arithmetic and notification derivation.
//! Nothing in this crate performs I/O; the persistence crate locks rows,
//! consults these rules, and writes the outcome.
//!
//! Money is carried as integer minor units (paise/cents) throughout.

pub mod authz;
pub mod error;
pub mod notify;
pub mod order;
pub mod payment;
pub mod service;
pub mod subscription;

pub use authz::{authorize, Action, Actor, Ownership, Resource, Role, ViewScope};
pub use error::{RentalError, RentalResult, TransitionError};
pub use notify::{Fanout, NotificationDraft, NotificationKind, RelatedEntity};
pub use order::{OrderRequest, OrderStatus, PriceSnapshot};
pub use payment::{PaymentStatus, PaymentTarget, PaymentType};
pub use service::{ServiceRequestDraft, ServiceStatus, ServiceUpdate};
pub use subscription::{LifecyclePolicy, Schedule, SubscriptionStatus};
