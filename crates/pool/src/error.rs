//! Error types for pool operations
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::slot::{SlotId, SlotState};

/// Result type for pool operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Error type returned by user supplied factory calls.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared, cloneable handle to an underlying error.
///
/// Events are broadcast to every subscriber, so causes are reference
/// counted rather than boxed.
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Error type for pool operations.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// Pool configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// An operation exceeded its time budget
    #[error("{operation} timed out after {timeout_ms}ms")]
    OperationTimedOut {
        /// The operation that timed out (e.g. "acquire", "create")
        operation: &'static str,
        /// The timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// An operation was cancelled before it completed
    #[error("{operation} was aborted")]
    OperationAborted {
        /// The operation that was aborted
        operation: &'static str,
    },

    /// The request queue is full
    #[error("Maximum queue size of {max_queue_size} exceeded")]
    MaxQueueSizeExceeded {
        /// The configured queue bound
        max_queue_size: usize,
    },

    /// The factory failed to create a resource
    #[error("Failed to create resource: {source}")]
    CreationFailed {
        /// The factory error
        #[source]
        source: Cause,
    },

    /// The factory rejected a resource during validation
    #[error("Failed to validate resource: {source}")]
    ValidationFailed {
        /// The factory error
        #[source]
        source: Cause,
    },

    /// The factory failed to destroy a resource
    #[error("Failed to destroy resource: {source}")]
    DestructionFailed {
        /// The factory error
        #[source]
        source: Cause,
    },

    /// The pool is not accepting work
    #[error("Pool is {state}")]
    PoolNotRunning {
        /// The pool state at the time of the call
        state: &'static str,
    },

    /// `start()` was called on a pool that has already started
    #[error("Pool has already been started")]
    AlreadyStarted,

    /// A slot was asked to perform a transition its state does not allow
    #[error("Invalid transition for slot {slot}: cannot {input} while {state}")]
    InvalidTransition {
        /// The slot identifier
        slot: SlotId,
        /// The slot state at the time of the call
        state: SlotState,
        /// The rejected input
        input: &'static str,
    },

    /// A request was asked to perform a transition its state does not allow
    #[error("Invalid transition for request {request}: cannot {operation} while {state}")]
    InvalidRequestTransition {
        /// The request identifier
        request: String,
        /// The request state at the time of the call
        state: &'static str,
        /// The rejected operation
        operation: &'static str,
    },

    /// A slot that should exist could not be found
    #[error("Unknown slot {slot}")]
    UnknownSlot {
        /// The slot identifier
        slot: SlotId,
    },

    /// An internal invariant was violated
    #[error("Internal error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl PoolError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a timeout error for the named operation
    #[must_use]
    pub fn timed_out(operation: &'static str, timeout: Duration) -> Self {
        Self::OperationTimedOut {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create an abort error for the named operation
    #[must_use]
    pub fn aborted(operation: &'static str) -> Self {
        Self::OperationAborted { operation }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OperationTimedOut { .. }
                | Self::OperationAborted { .. }
                | Self::MaxQueueSizeExceeded { .. }
                | Self::CreationFailed { .. }
                | Self::ValidationFailed { .. }
        )
    }

    /// Whether this error signals a logic defect rather than a runtime condition
    #[must_use]
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::InvalidRequestTransition { .. }
                | Self::UnknownSlot { .. }
                | Self::Internal { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_includes_operation_and_duration() {
        let err = PoolError::timed_out("acquire", Duration::from_millis(200));
        assert_eq!(err.to_string(), "acquire timed out after 200ms");
        assert!(err.is_retryable());
        assert!(!err.is_bug());
    }

    #[test]
    fn factory_errors_keep_their_cause() {
        let cause: Cause = Arc::from(BoxError::from("Oh Noes!"));
        let err = PoolError::CreationFailed { source: cause };
        assert_eq!(err.to_string(), "Failed to create resource: Oh Noes!");
        assert_eq!(
            std::error::Error::source(&err).map(ToString::to_string),
            Some("Oh Noes!".to_string())
        );
    }

    #[test]
    fn transition_errors_are_bugs() {
        let err = PoolError::InvalidTransition {
            slot: SlotId::new(7),
            state: SlotState::Zombie,
            input: "acquire",
        };
        assert!(err.is_bug());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Invalid transition for slot 7: cannot acquire while zombie"
        );
    }
}
