//! Error types for dossier-providers

use std::time::Duration;

use dossier_core::ServiceError;
use thiserror::Error;

/// Errors raised while configuring or constructing a provider client.
///
/// Failures of individual calls are reported as [`ServiceError`] so the
/// pipeline's retry layer can classify them.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Required API key missing from the environment
    #[error("{service} API key is not set (expected {env_var})")]
    MissingApiKey {
        service: &'static str,
        env_var: &'static str,
    },

    /// A configuration value could not be used
    #[error("Invalid {service} configuration: {message}")]
    InvalidConfig { service: &'static str, message: String },

    /// HTTP client construction failed
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Http(err.to_string())
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MissingApiKey { service, .. } | ProviderError::InvalidConfig { service, .. } => {
                ServiceError::NotConfigured {
                    service: service.to_string(),
                    message: err.to_string(),
                }
            }
            ProviderError::Http(message) => ServiceError::network("http", message),
        }
    }
}

/// Result type for provider construction.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Classify a transport failure. Timeouts keep their own variant so callers
/// can tell a slow service from an unreachable one.
pub(crate) fn transport_error(service: &str, err: &reqwest::Error, timeout: Duration) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout {
            service: service.to_string(),
            elapsed_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else if err.is_decode() {
        ServiceError::invalid_response(service, err.to_string())
    } else {
        ServiceError::network(service, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_maps_to_not_configured() {
        let err = ProviderError::MissingApiKey {
            service: "completion",
            env_var: "ANTHROPIC_API_KEY",
        };
        assert_eq!(err.to_string(), "completion API key is not set (expected ANTHROPIC_API_KEY)");

        let service: ServiceError = err.into();
        assert!(matches!(service, ServiceError::NotConfigured { ref service, .. } if service == "completion"));
        assert!(!service.is_transient());
    }
}
