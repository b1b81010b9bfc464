//! Error types for the CSI auth e2e suite
//!
//! Errors carry enough context (resource kind/name, operation, scenario) to
//! make a failed run readable without re-running it with debug logging.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for suite operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A Kubernetes object that was expected to exist is gone
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (e.g. "Secret", "Pod")
        kind: String,
        /// Resource name, namespaced as `ns/name` where applicable
        name: String,
    },

    /// Invalid configuration or driver definition
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g. "auth.matchGroups[0]")
        field: Option<String>,
    },

    /// The driver under test could not satisfy a request of the framework
    #[error("driver error [{driver}]: {message}")]
    Driver {
        /// Driver name
        driver: String,
        /// Description of what failed
        message: String,
    },

    /// A test expectation did not hold
    #[error("assertion failed: {message}")]
    Assertion {
        /// What was expected and what happened
        message: String,
    },

    /// Waiting for a cluster condition took too long
    #[error("timed out [{operation}]: {message}")]
    Timeout {
        /// Operation that was waiting (e.g. "wait_for_pod_running")
        operation: String,
        /// What was being waited for
        message: String,
    },

    /// Several errors collected during cleanup
    #[error("{context}: {}", format_aggregate(.errors))]
    Aggregate {
        /// What was being done when the errors were collected
        context: String,
        /// The collected errors, in the order they happened
        errors: Vec<Error>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Filesystem error while reading configuration or writing reports
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

fn format_aggregate(errors: &[Error]) -> String {
    match errors {
        [single] => single.to_string(),
        many => format!(
            "[{}]",
            many.iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a driver error
    pub fn driver(driver: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Driver {
            driver: driver.into(),
            message: msg.into(),
        }
    }

    /// Create an assertion failure
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion {
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Collapse a list of errors into one.
    ///
    /// Returns `None` for an empty list so callers can write
    /// `if let Some(err) = Error::aggregate(..)`.
    pub fn aggregate(context: impl Into<String>, errors: Vec<Error>) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        Some(Self::Aggregate {
            context: context.into(),
            errors,
        })
    }

    /// Check if this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error means a concurrent writer won the update race
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(ae),
            } if ae.code == 409
        )
    }

    /// Check if this error is retryable
    ///
    /// Configuration, assertion and not-found errors need a human; transient
    /// API failures and conflicts do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code == 409 || ae.code == 429 || ae.code >= 500,
                _ => true,
            },
            Error::NotFound { .. } => false,
            Error::Validation { .. } => false,
            Error::Driver { .. } => false,
            Error::Assertion { .. } => false,
            Error::Timeout { .. } => true,
            Error::Aggregate { errors, .. } => errors.iter().all(Error::is_retryable),
            Error::Serialization { .. } => false,
            Error::Io(_) => false,
            Error::Internal { .. } => true,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
