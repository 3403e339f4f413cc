//! Error types for the forge operator
//!
//! Errors carry the kind and name of the object involved so that log lines
//! and status messages point at the exact reference that needs fixing.
//! Classification into retryable and permanent failures lives here so that
//! the reconciler is the only place that decides between requeue and drop.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for forge operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that does not map onto a more specific variant
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A referenced object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of the missing object (e.g. "ToolchainIntegration")
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// Optimistic concurrency rejection: the object changed since it was read
    #[error("conflict writing {kind} '{name}': object was modified")]
    Conflict {
        /// Kind of the object being written
        kind: String,
        /// Name of the object being written
        name: String,
    },

    /// Create raced with another writer
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Kind of the object being created
        kind: String,
        /// Name of the object being created
        name: String,
    },

    /// Credential or authorization denial
    #[error("forbidden: {message}")]
    Forbidden {
        /// Description of the denial
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A spec does not satisfy the schema of its integration
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.arguments.dockerfile")
        field: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "queue", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error for the given kind and name
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for the given kind and name
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(msg: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify a kube-rs error for the object identified by `kind`/`name`.
    ///
    /// API status codes are mapped onto the taxonomy the reconciler acts on:
    /// 404 is NotFound, 409 is AlreadyExists or Conflict depending on the
    /// reason, 403 is Forbidden. Everything else stays a transport error.
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Self::already_exists(kind, name)
            }
            kube::Error::Api(resp) if resp.code == 409 => Self::conflict(kind, name),
            kube::Error::Api(resp) if resp.code == 403 => Self::forbidden(resp.message.clone()),
            _ => Self::Kube { source: err },
        }
    }

    /// Check if this error is retryable
    ///
    /// Retryable errors are transient and may succeed on retry.
    /// Non-retryable errors need a change to the resource or to cluster
    /// permissions before another attempt can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { .. } => true,
            Error::NotFound { .. } => true,
            Error::Conflict { .. } => true,
            Error::AlreadyExists { .. } => true,
            Error::Internal { .. } => true,
            Error::Forbidden { .. } => false,
            Error::Serialization { .. } => false,
            Error::Validation { .. } => false,
        }
    }

    /// Whether this is an optimistic concurrency rejection
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Short machine-readable reason recorded on resource status
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "KubernetesError",
            Error::NotFound { .. } => "NotFound",
            Error::Conflict { .. } => "Conflict",
            Error::AlreadyExists { .. } => "AlreadyExists",
            Error::Forbidden { .. } => "Forbidden",
            Error::Serialization { .. } => "SerializationError",
            Error::Validation { .. } => "ValidationFailed",
            Error::Internal { .. } => "InternalError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::serialization(err.to_string())
    }
}
