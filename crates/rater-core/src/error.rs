use thiserror::Error;

/// Application-wide error types for Rater.
#[derive(Error, Debug)]
pub enum AppError {
    /// The analysis service could not be reached (DNS, connect, reset, body read).
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The analysis request exceeded the client's timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The analysis service answered with a non-success status.
    #[error("Service error (HTTP {status_code}): {message}")]
    ServiceError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// The analysis service answered but the reply carried no text.
    #[error("Empty reply from analysis service")]
    EmptyReply,

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading from or acknowledging on the input queue failed.
    #[error("Broker error: {0}")]
    BrokerError(String),

    /// Writing a result to the output queue failed.
    #[error("Publish error: {0}")]
    PublishError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::TransportError(_) | AppError::Timeout(_) | AppError::BrokerError(_) => true,
            AppError::ServiceError { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::TransportError("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(
            AppError::ServiceError {
                message: "overloaded".into(),
                status_code: 503,
                retryable: true,
            }
            .is_retryable()
        );
        assert!(
            !AppError::ServiceError {
                message: "bad request".into(),
                status_code: 400,
                retryable: false,
            }
            .is_retryable()
        );
        assert!(!AppError::EmptyReply.is_retryable());
        assert!(!AppError::ConfigError("missing".into()).is_retryable());
    }

    #[test]
    fn test_service_error_display() {
        let err = AppError::ServiceError {
            message: "model not found".into(),
            status_code: 404,
            retryable: false,
        };
        assert_eq!(
            err.to_string(),
            "Service error (HTTP 404): model not found"
        );
    }
}
