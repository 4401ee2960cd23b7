//! Error types for the dossier pipeline.

/// Errors produced by the evidence pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DossierError {
    /// The caller-supplied cancellation signal fired.
    #[error("pipeline cancelled by caller")]
    Cancelled,

    #[error("unparseable model output: {reason}")]
    Parse { reason: String },

    #[error("external service error: {0}")]
    Service(#[from] ServiceError),

    #[error("invalid synthesis transition from {from} on {signal}")]
    InvalidTransition { from: String, signal: String },

    #[error("invalid configuration for {key}: {reason}")]
    Config { key: String, reason: String },

    #[error("unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("invalid subject profile: {0}")]
    InvalidSubject(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DossierError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DossierError::Cancelled)
    }
}

/// Result type for pipeline operations.
pub type DossierResult<T> = std::result::Result<T, DossierError>;

/// Failure reported by an external collaborator (search, fetch, completion, synthesis).
///
/// Carries enough information for the retry layer to decide whether a call
/// is worth repeating: 5xx, 429 and transport failures are transient, every
/// other 4xx is permanent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} returned HTTP {status}: {message}")]
    Http {
        service: String,
        status: u16,
        message: String,
    },

    #[error("{service} network error: {message}")]
    Network { service: String, message: String },

    #[error("{service} timed out after {elapsed_ms}ms")]
    Timeout { service: String, elapsed_ms: u64 },

    #[error("{service} returned an invalid response: {message}")]
    InvalidResponse { service: String, message: String },

    #[error("{service} is not configured: {message}")]
    NotConfigured { service: String, message: String },
}

impl ServiceError {
    pub fn http(service: &str, status: u16, message: impl Into<String>) -> Self {
        ServiceError::Http {
            service: service.to_string(),
            status,
            message: message.into(),
        }
    }

    pub fn network(service: &str, message: impl Into<String>) -> Self {
        ServiceError::Network {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_response(service: &str, message: impl Into<String>) -> Self {
        ServiceError::InvalidResponse {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// HTTP status code, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ServiceError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a bounded retry may succeed (5xx, 429, transport, timeout).
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Http { status, .. } => *status == 429 || *status >= 500,
            ServiceError::Network { .. } | ServiceError::Timeout { .. } => true,
            ServiceError::InvalidResponse { .. } | ServiceError::NotConfigured { .. } => false,
        }
    }
}

/// Result type for provider calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_display() {
        let err = DossierError::Cancelled;
        assert_eq!(err.to_string(), "pipeline cancelled by caller");
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_service_error_display() {
        let err = ServiceError::http("completion", 503, "overloaded");
        assert_eq!(err.to_string(), "completion returned HTTP 503: overloaded");
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ServiceError::http("s", 429, "slow down").is_transient());
        assert!(ServiceError::http("s", 500, "boom").is_transient());
        assert!(ServiceError::network("s", "reset").is_transient());
        assert!(!ServiceError::http("s", 400, "bad request").is_transient());
        assert!(!ServiceError::http("s", 404, "gone").is_transient());
        assert!(!ServiceError::invalid_response("s", "garbage").is_transient());
    }

    #[test]
    fn test_service_error_converts_into_dossier_error() {
        let err: DossierError = ServiceError::network("search", "dns").into();
        assert!(matches!(err, DossierError::Service(_)));
        assert!(!err.is_cancelled());
    }
}
