use std::fmt;

/// Non-fatal conditions met during a release run.
/// These are reported to the operator but never abort the run.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseWarning {
    /// Tag exists but is not a release version
    UnparsableTag { tag: String, reason: String },
    /// Regenerated lock file does not point at the tagged commit yet
    LockDrift {
        package: String,
        attempt: u32,
        reason: String,
    },
    /// A best-effort step failed and was skipped
    NonCriticalStepFailed { step: String, reason: String },
    /// The changelog of a public or manually curated release is left alone
    ChangelogLocked { tag: String },
    /// Tag to delete was not present
    TagAlreadyAbsent { tag: String, repository: String },
}

impl fmt::Display for ReleaseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseWarning::UnparsableTag { tag, reason } => {
                write!(f, "Skipping tag '{}': {}", tag, reason)
            }
            ReleaseWarning::LockDrift {
                package,
                attempt,
                reason,
            } => {
                write!(
                    f,
                    "Lock entry for '{}' not ready on attempt {}: {}",
                    package, attempt, reason
                )
            }
            ReleaseWarning::NonCriticalStepFailed { step, reason } => {
                write!(f, "Step '{}' failed and was skipped: {}", step, reason)
            }
            ReleaseWarning::ChangelogLocked { tag } => {
                write!(f, "May not alter changelog of {}", tag)
            }
            ReleaseWarning::TagAlreadyAbsent { tag, repository } => {
                write!(f, "Tag '{}' does not exist in '{}'", tag, repository)
            }
        }
    }
}

impl ReleaseWarning {
    /// Emit the warning through the log
    pub fn emit(&self) {
        tracing::warn!("{}", self);
    }
}
