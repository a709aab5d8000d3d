//! Error taxonomy for provisioning activities
//!
//! Every activity failure is classified into one of four categories. The
//! step executor retries `Transient` and `ExternalSystem` errors per the
//! step's retry policy; `Validation` and `Conflict` errors are terminal on
//! first occurrence and drive compensation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provisioning error classified for retry handling
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ProvisionError {
    /// Malformed input, never retried
    #[error("validation error: {0}")]
    Validation(String),

    /// External resource already exists in an unexpected state, never
    /// retried - requires operator intervention
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network / timeout / throttling, retried per policy
    #[error("transient error: {0}")]
    Transient(String),

    /// 5xx-class failure from a collaborator, retried with backoff
    #[error("external system error (status {status}): {message}")]
    ExternalSystem {
        /// HTTP-style status code reported by the collaborator
        status: u16,
        /// Collaborator-supplied message
        message: String,
    },
}

impl ProvisionError {
    /// Whether the step executor may retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::ExternalSystem { .. })
    }

    /// Step timeout, treated as an abandoned (retryable) attempt
    pub fn timeout() -> Self {
        Self::Transient("attempt timed out".into())
    }
}

/// Result type for provisioning operations
pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ProvisionError::Transient("conn reset".into()).is_retryable());
        assert!(ProvisionError::ExternalSystem { status: 503, message: "busy".into() }
            .is_retryable());
        assert!(!ProvisionError::Validation("bad plan".into()).is_retryable());
        assert!(!ProvisionError::Conflict("realm exists".into()).is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        assert!(ProvisionError::timeout().is_retryable());
    }
}
