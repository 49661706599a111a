//! Domain error model.

use thiserror::Error;

use crate::id::AttributeId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Persistence failures belong to the store layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. empty label).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A catalog invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Some, but not all, live variants carry an assignment for the attribute.
    ///
    /// Never retryable: the product's variant set is already damaged and the
    /// operation is aborted untouched.
    #[error("inconsistent attribute presence: some but not all variants have attribute {0}")]
    InconsistentAttributePresence(AttributeId),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("{0} not found")]
    NotFound(String),

    /// The request conflicts with the current state.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// `what` names the missing resource, e.g. `"attribute 7"`.
    pub fn not_found(what: impl core::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_resource() {
        let err = DomainError::not_found(AttributeId::new(7));
        assert_eq!(err.to_string(), "attribute 7 not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn inconsistent_presence_carries_attribute() {
        let err = DomainError::InconsistentAttributePresence(AttributeId::new(3));
        match err {
            DomainError::InconsistentAttributePresence(id) => assert_eq!(id.get(), 3),
            _ => panic!("Expected InconsistentAttributePresence"),
        }
    }
}
