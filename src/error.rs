//! Error types for the rangeforge build engine.
//!
//! This module provides the error hierarchy for every stage of a build pass:
//! topology configuration, revision storage, classification and orchestration,
//! and the provisioning collaborators invoked by the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for rangeforge.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Revision store errors.
    #[error("Revision error: {0}")]
    Revision(#[from] RevisionError),

    /// Build orchestration errors.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Provisioning collaborator errors.
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The topology file was not found.
    #[error("Topology file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The topology file could not be parsed.
    #[error("Failed to parse topology: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Topology validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An environment override carried an unusable value.
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Kind of resource (network, host, step...).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// A reference to an undefined resource.
    #[error("Unknown {resource_type} referenced: {name}")]
    UnknownReference {
        /// Kind of the referenced resource.
        resource_type: String,
        /// The dangling name.
        name: String,
    },
}

/// Revision store errors.
#[derive(Debug, Error)]
pub enum RevisionError {
    /// A record exists but cannot be decoded.
    #[error("Corrupt revision record at {path}: {message}")]
    Corrupt {
        /// Path of the unreadable record.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// Filesystem failure while reading or writing a record.
    #[error("Revision I/O failed at {path}: {message}")]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The build root is locked by another build.
    #[error("Build root is locked by another process (holder: {holder}, since: {since})")]
    LockContention {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("Revision serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// No record exists for the requested node.
    #[error("No revision record for {id}")]
    NotFound {
        /// Node identity.
        id: String,
    },
}

/// Build orchestration errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The classifier could not pick an action.
    #[error("Cannot classify {id}: {reason}")]
    ClassificationAmbiguous {
        /// Node identity.
        id: String,
        /// Why classification failed.
        reason: String,
    },

    /// A collaborator call failed for a node.
    #[error("{action} of {id} failed: {reason}")]
    Collaborator {
        /// Node identity.
        id: String,
        /// Action being applied.
        action: String,
        /// Failure description.
        reason: String,
    },

    /// The node's parent did not commit in this pass.
    #[error("{id} skipped: parent {parent} did not commit")]
    DependencyBlocked {
        /// Node identity.
        id: String,
        /// Identity of the blocking ancestor.
        parent: String,
    },

    /// The pass was interrupted.
    #[error("Build cancelled")]
    Cancelled,
}

/// Provisioning collaborator errors.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// A failure that may succeed if attempted again.
    #[error("Transient failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// A failure that retrying will not fix.
    #[error("Permanent failure: {message}")]
    Permanent {
        /// Description of the failure.
        message: String,
    },

    /// No collaborator is registered for a node kind.
    #[error("No collaborator registered for {kind}")]
    Unregistered {
        /// The node kind.
        kind: String,
    },

    /// The retry deadline elapsed.
    #[error("Deadline of {secs}s exceeded after {attempts} attempts")]
    DeadlineExceeded {
        /// Configured deadline in seconds.
        secs: u64,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The call observed the cancellation signal.
    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for rangeforge operations.
pub type Result<T> = std::result::Result<T, ForgeError>;

impl ForgeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Collaborator(CollaboratorError::Transient { .. })
                | Self::Revision(
                    RevisionError::Io { .. } | RevisionError::LockContention { .. }
                )
        )
    }

    /// Returns the suggested retry delay in milliseconds, if applicable.
    #[must_use]
    pub const fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::Collaborator(CollaboratorError::Transient { .. }) => Some(500),
            Self::Revision(RevisionError::Io { .. }) => Some(50),
            Self::Revision(RevisionError::LockContention { .. }) => Some(1000),
            _ => None,
        }
    }

    /// Returns true if this error came from a cancellation signal.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Build(BuildError::Cancelled) | Self::Collaborator(CollaboratorError::Cancelled)
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl RevisionError {
    /// Creates an I/O error for a path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a corrupt-record error for a path.
    #[must_use]
    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl CollaboratorError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }
}
