//! Error taxonomy shared by every rental operation.
//!
//! Every variant maps to a stable machine-readable code via
//! [`RentalError::kind`]. Storage failures carry only the name of the
//! operation that failed; the underlying driver error is logged at the
//! point of failure and never travels to the caller.

use thiserror::Error;

pub type RentalResult<T> = Result<T, RentalError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RentalError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("payment signature verification failed")]
    InvalidSignature,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("payment gateway unavailable: {0}")]
    Gateway(String),

    #[error("storage failure during {0}")]
    Storage(&'static str),
}

impl RentalError {
    /// Stable code for API surfaces and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RentalError::NotFound(_) => "NOT_FOUND",
            RentalError::PermissionDenied(_) => "PERMISSION_DENIED",
            RentalError::InvalidState(_) => "INVALID_STATE",
            RentalError::InvalidSignature => "INVALID_SIGNATURE",
            RentalError::Conflict(_) => "CONFLICT",
            RentalError::Validation(_) => "VALIDATION_ERROR",
            RentalError::Gateway(_) => "GATEWAY_UNAVAILABLE",
            RentalError::Storage(_) => "STORAGE",
        }
    }

    pub fn not_found(entity: &str, id: i64) -> Self {
        RentalError::NotFound(format!("{entity} {id}"))
    }
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Returned by the transition tables when a requested status change is not
/// an edge of the entity's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal {} transition: {} -> {}",
            self.entity, self.from, self.to
        )
    }
}

impl std::error::Error for TransitionError {}

impl From<TransitionError> for RentalError {
    fn from(e: TransitionError) -> Self {
        RentalError::InvalidState(e.to_string())
    }
}
