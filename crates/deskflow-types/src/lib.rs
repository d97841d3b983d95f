//! Shared error taxonomy for the deskflow engine.
//!
//! Every deskflow crate reports failures through [`DeskflowError`]. The
//! variants fall into four classes:
//! - oracle transport failures (`ProviderError`, `RateLimited`, `AuthError`,
//!   `RequestTimeout`) which the resolver turns into a fallback transition
//! - startup failures (`GraphIntegrity`, `Config`) which abort initialization
//! - request failures (`ProfileNotFound`, `EntityNotFound`, `StageNotFound`)
//!   surfaced to the caller of a single operation
//! - everything else

/// Unified error type for all deskflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum DeskflowError {
    // === Oracle transport errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    // === Startup errors ===
    #[error("Workflow graph integrity violated: {0}")]
    GraphIntegrity(String),

    #[error("Invalid workflow configuration: {0}")]
    Config(String),

    // === Request errors ===
    #[error("No profile matches selector '{selector}'")]
    ProfileNotFound { selector: String },

    #[error("Entity '{id}' not found")]
    EntityNotFound { id: String },

    #[error("Stage '{stage}' is not defined in the workflow")]
    StageNotFound { stage: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DeskflowError {
    /// Returns `true` for failures of the call to the generative model.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DeskflowError::ProviderError { .. }
                | DeskflowError::RateLimited { .. }
                | DeskflowError::AuthError { .. }
                | DeskflowError::RequestTimeout { .. }
        )
    }

    /// Returns `true` if the error must stop process startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeskflowError::GraphIntegrity(_) | DeskflowError::Config(_)
        )
    }

    /// Maps the error to an HTTP status code for a web front end.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            DeskflowError::RateLimited { .. } => Some(429),
            DeskflowError::AuthError { .. } => Some(401),
            DeskflowError::ProviderError { .. } => Some(502),
            DeskflowError::RequestTimeout { .. } => Some(504),
            DeskflowError::ProfileNotFound { .. } | DeskflowError::StageNotFound { .. } => {
                Some(400)
            }
            DeskflowError::EntityNotFound { .. } => Some(404),
            DeskflowError::GraphIntegrity(_) | DeskflowError::Config(_) => Some(500),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, DeskflowError>`.
pub type Result<T> = std::result::Result<T, DeskflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_provider_error() {
        let err = DeskflowError::ProviderError {
            provider: "openai".into(),
            status: 500,
            message: "internal server error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Provider openai returned HTTP 500: internal server error"
        );
    }

    #[test]
    fn error_display_timeout() {
        let err = DeskflowError::RequestTimeout {
            provider: "anthropic".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(
            err.to_string(),
            "Request to anthropic timed out after 30000ms"
        );
    }

    #[test]
    fn error_display_graph_integrity() {
        let err = DeskflowError::GraphIntegrity("duplicate stage 'A'".into());
        assert_eq!(
            err.to_string(),
            "Workflow graph integrity violated: duplicate stage 'A'"
        );
    }

    #[test]
    fn error_display_profile_not_found() {
        let err = DeskflowError::ProfileNotFound {
            selector: "Acme".into(),
        };
        assert_eq!(err.to_string(), "No profile matches selector 'Acme'");
    }

    #[test]
    fn transport_class() {
        assert!(DeskflowError::AuthError {
            provider: "x".into()
        }
        .is_transport());
        assert!(DeskflowError::RateLimited {
            provider: "x".into(),
            retry_after_ms: 10
        }
        .is_transport());
        assert!(DeskflowError::RequestTimeout {
            provider: "x".into(),
            timeout_ms: 10
        }
        .is_transport());
        assert!(!DeskflowError::Other("boom".into()).is_transport());
        assert!(!DeskflowError::GraphIntegrity("x".into()).is_transport());
    }

    #[test]
    fn fatal_class() {
        assert!(DeskflowError::GraphIntegrity("x".into()).is_fatal());
        assert!(DeskflowError::Config("x".into()).is_fatal());
        assert!(!DeskflowError::EntityNotFound { id: "x".into() }.is_fatal());
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            DeskflowError::ProfileNotFound {
                selector: "x".into()
            }
            .http_status(),
            Some(400)
        );
        assert_eq!(
            DeskflowError::EntityNotFound { id: "x".into() }.http_status(),
            Some(404)
        );
        assert_eq!(
            DeskflowError::RequestTimeout {
                provider: "x".into(),
                timeout_ms: 1
            }
            .http_status(),
            Some(504)
        );
        assert_eq!(DeskflowError::Other("x".into()).http_status(), None);
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DeskflowError = io_err.into();
        assert!(matches!(err, DeskflowError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: DeskflowError = json_err.into();
        assert!(matches!(err, DeskflowError::Json(_)));
    }
}
