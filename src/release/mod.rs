//! Release runs
//!
//! A full run moves through [ReleaseState]: the component repositories are
//! tagged, the consuming project's lock file is regenerated until it points
//! at the tagged commits, and the release is published to the release
//! list, the download area and the update service.

pub mod prepare;
pub mod service;

pub use prepare::{ReleasePreparer, ARCHIVES};
pub use service::{ComposerResolver, DependencyResolver, ReleaseOrchestrator, Sleeper, ThreadSleeper};

use crate::error::Result;
use crate::warning::ReleaseWarning;
use std::fmt;

/// Progress of a release run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReleaseState {
    Preparing,
    Tagged,
    ManifestValidated,
    Published,
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseState::Preparing => write!(f, "preparing"),
            ReleaseState::Tagged => write!(f, "tagged"),
            ReleaseState::ManifestValidated => write!(f, "manifest validated"),
            ReleaseState::Published => write!(f, "published"),
        }
    }
}

/// Run a step whose failure must not abort the release
///
/// Errors are reported as [ReleaseWarning::NonCriticalStepFailed].
pub fn non_critical<T>(step: &str, run: impl FnOnce() -> Result<T>) -> Option<T> {
    match run() {
        Ok(value) => Some(value),
        Err(err) => {
            ReleaseWarning::NonCriticalStepFailed {
                step: step.to_string(),
                reason: err.to_string(),
            }
            .emit();
            None
        }
    }
}
