use std::time::Duration;
use thiserror::Error;

/// Unified error type for release-tools operations
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    #[error("Invalid stability: {0}")]
    InvalidStability(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("Command `{command}` failed with exit code {exit_code}: {stderr}")]
    Process {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error(
        "Failed to tag repository '{failed}' with {tag}: {reason}. \
         Tags already pushed to [{}] must be removed manually before retrying",
        pushed.join(", ")
    )]
    PartialTagging {
        tag: String,
        failed: String,
        pushed: Vec<String>,
        reason: String,
    },

    #[error("Failed to create release branch for {tag}: {reason}")]
    ReleaseBranch { tag: String, reason: String },

    #[error("Tag {0} not found")]
    TagNotFound(String),

    #[error("Release {0} is already public")]
    AlreadyPublic(String),

    #[error("Lock file did not resolve to the tagged commits after {attempts} attempts")]
    LockNotConverged { attempts: u32 },

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Release manifest error: {0}")]
    Manifest(String),

    #[error("Remote operation failed: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenience type alias for Results in release-tools
pub type Result<T> = std::result::Result<T, ReleaseError>;

impl ReleaseError {
    /// Create a configuration error with context
    pub fn config(msg: impl Into<String>) -> Self {
        ReleaseError::Config(msg.into())
    }

    /// Create a consistency error with context
    pub fn consistency(msg: impl Into<String>) -> Self {
        ReleaseError::Consistency(msg.into())
    }

    /// Create a release manifest error with context
    pub fn manifest(msg: impl Into<String>) -> Self {
        ReleaseError::Manifest(msg.into())
    }

    /// Create a remote error with context
    pub fn remote(msg: impl Into<String>) -> Self {
        ReleaseError::Remote(msg.into())
    }

    /// Expected, user-facing failures that are reported with exit code 1
    /// and never retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ReleaseError::InvalidTag(_)
                | ReleaseError::InvalidConstraint(_)
                | ReleaseError::InvalidStability(_)
                | ReleaseError::TagNotFound(_)
                | ReleaseError::AlreadyPublic(_)
        )
    }

    /// Failures of a single external invocation that an enclosing retry
    /// loop may absorb.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReleaseError::Timeout { .. } | ReleaseError::Process { .. }
        )
    }
}
