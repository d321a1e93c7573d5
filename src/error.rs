//! Error types for the agent access controller

use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A primary record is missing fields the controller needs to synthesize anything
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The downstream kind is not served by this cluster (its CRD is not installed)
    #[error("schema unavailable: {kind} is not installed in this cluster")]
    SchemaUnavailable {
        /// Kind name, e.g. AuthPolicy
        kind: String,
    },

    /// A downstream record could not be written
    #[error("failed to apply {kind} {name}: {source}")]
    Apply {
        /// Kind of the record
        kind: String,
        /// Name of the record
        name: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// One or more failures collected during a fan-out pass
    #[error("encountered {count} error(s) during reconciliation; {message}")]
    Aggregate {
        /// Number of collected failures
        count: usize,
        /// Failure messages joined with "; "
        message: String,
    },

    /// Unexpected internal state
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a schema-unavailable error for the given kind
    pub fn schema_unavailable(kind: impl Into<String>) -> Self {
        Self::SchemaUnavailable { kind: kind.into() }
    }

    /// Wrap a failure to write the named downstream record
    pub fn apply(kind: impl Into<String>, name: impl Into<String>, source: Error) -> Self {
        Self::Apply {
            kind: kind.into(),
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Fold a list of failures into a single aggregate error
    pub fn aggregate(errors: &[Error]) -> Self {
        let message = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Self::Aggregate {
            count: errors.len(),
            message,
        }
    }

    /// HTTP status code of the underlying API error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Kube(kube::Error::Api(resp)) => Some(resp.code),
            Self::Apply { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// Whether a 404 means the API server does not serve the resource type at
    /// all, as opposed to a missing object or namespace
    pub fn is_unserved_type(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(resp)) => {
                resp.code == 404 && resp.message.contains(UNSERVED_TYPE_MESSAGE)
            }
            Self::Apply { source, .. } => source.is_unserved_type(),
            _ => false,
        }
    }

    /// Whether the API server rejected a write because of a stale resourceVersion
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }
}

/// Message the API server returns for a path no installed API serves
const UNSERVED_TYPE_MESSAGE: &str = "the server could not find the requested resource";

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    api_error_with_message(code, reason, &format!("{reason} ({code})"))
}

#[cfg(test)]
pub(crate) fn api_error_with_message(code: u16, reason: &str, message: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

#[cfg(test)]
pub(crate) fn unserved_type_error() -> Error {
    api_error_with_message(404, "NotFound", UNSERVED_TYPE_MESSAGE)
}
