/*!
Error types for the cluster backup core engine.
*/

use std::fmt;

use thiserror::Error;

use crate::cluster::ClusterError;

/// Result type used throughout the cluster backup core.
pub type Result<T> = std::result::Result<T, BackupError>;

/// The cluster call that failed while applying a restored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Create,
    Fetch,
    Update,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            ApplyAction::Create => "create",
            ApplyAction::Fetch => "fetch existing",
            ApplyAction::Update => "update",
        };
        f.write_str(verb)
    }
}

/// Errors that can occur during backup, restore and cleanup runs.
#[derive(Error, Debug)]
pub enum BackupError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Packaging or unpacking of the archive container failed
    #[error("Archive error: {0}")]
    Archive(String),

    /// Destination directory errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input or configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// The namespace set could not be computed
    #[error("Failed to list namespaces: {0}")]
    NamespaceListing(#[source] ClusterError),

    /// An archive entry path does not follow the archive layout
    #[error("Malformed archive entry {path:?}: {reason}")]
    MalformedEntry { path: String, reason: String },

    /// Neither the entry body nor its path carry a resource name
    #[error("Archive entry {path:?} has no resolvable resource name")]
    MissingName { path: String },

    /// A create, fetch or update call failed during restore
    #[error("Failed to {action} resource {namespace}/{name}: {source}")]
    Apply {
        action: ApplyAction,
        namespace: String,
        name: String,
        #[source]
        source: ClusterError,
    },

    /// The requested archive is not present at the destination
    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    /// An archive with the same name already exists at the destination
    #[error("Archive already exists: {0}")]
    ArchiveExists(String),

    /// An archive could not be removed during cleanup
    #[error("Failed to remove archive {file:?}: {source}")]
    Retention {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored archive does not match its recorded digest
    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// Logging or metrics could not be initialized
    #[error("Observability error: {0}")]
    Observability(String),

    /// The caller cancelled the run
    #[error("Operation cancelled")]
    Cancelled,
}

impl BackupError {
    /// Create a new archive error
    pub fn archive<S: Into<String>>(msg: S) -> Self {
        Self::Archive(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new malformed entry error
    pub fn malformed<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Self::MalformedEntry {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackupError::Cancelled)
    }
}
