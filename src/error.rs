//! Error types for the TCC coordinator

use thiserror::Error;

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum TccError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// This node lacks the role required for the operation (not the master,
    /// not the branch owner). Routine in a multi-node deployment.
    #[error("Not authorized to perform {operation}")]
    NotAuthorized { operation: String },

    #[error("Recovery error: {0}")]
    Recovery(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("Invalid node identifier {identifier:?}: {message}")]
    InvalidIdentifier { identifier: String, message: String },

    #[error("No server available for service {service}")]
    NoServerAvailable { service: String },

    #[error("Participant {target} rejected {operation}: status {status}")]
    Transport {
        target: String,
        operation: String,
        status: u16,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TccError {
    /// Check if error is an authorization refusal
    pub fn is_not_authorized(&self) -> bool {
        matches!(self, TccError::NotAuthorized { .. })
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TccError::Recovery(_)
                | TccError::NoServerAvailable { .. }
                | TccError::Http(_)
                | TccError::Io(_)
        ) || matches!(self, TccError::Transport { status, .. } if *status >= 500)
    }

    pub fn not_authorized(operation: impl Into<String>) -> Self {
        TccError::NotAuthorized {
            operation: operation.into(),
        }
    }
}

impl From<serde_json::Error> for TccError {
    fn from(err: serde_json::Error) -> Self {
        TccError::Serialization(err.to_string())
    }
}

/// Result type for coordinator operations
pub type TccResult<T> = Result<T, TccError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_authorized_is_not_retryable() {
        let err = TccError::not_authorized("timing recovery");
        assert!(err.is_not_authorized());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Not authorized to perform timing recovery");
    }

    #[test]
    fn test_server_side_transport_errors_are_retryable() {
        let err = TccError::Transport {
            target: "orderSvc".to_string(),
            operation: "confirm".to_string(),
            status: 503,
        };
        assert!(err.is_retryable());

        let err = TccError::Transport {
            target: "orderSvc".to_string(),
            operation: "confirm".to_string(),
            status: 404,
        };
        assert!(!err.is_retryable());
    }
}
