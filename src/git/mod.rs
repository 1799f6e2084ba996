//! Read-only repository access
//!
//! This module provides a trait-based abstraction over the repository
//! queries release-tools needs, allowing for a real implementation and an
//! in-memory one for testing.
//!
//! # Overview
//!
//! - [repository::Git2Reader]: A real implementation using the `git2` crate
//! - [mock::MockGitReader]: A mock implementation for testing
//!
//! Writes (tagging, pushing, branch creation) go through the `git` binary
//! in [crate::git_ops] so signing and credentials follow the operator's
//! git setup.
//!
//! ```rust
//! # use release_tools::git::GitReader;
//! # use std::path::Path;
//! # fn example<R: GitReader>(reader: &R) -> release_tools::Result<()> {
//! let head = reader.head_commit(Path::new("repos/core"))?;
//! let branches = reader.remote_branches(Path::new("repos/core"), "origin")?;
//! # Ok(())
//! # }
//! ```

pub mod mock;
pub mod repository;

pub use mock::MockGitReader;
pub use repository::Git2Reader;

use crate::error::Result;
use std::path::Path;

/// Repository queries used by the resolver, the branch matcher and the
/// lock file validation
///
/// ## Thread Safety
///
/// All implementors must be `Send + Sync`.
pub trait GitReader: Send + Sync {
    /// Full SHA of the commit `HEAD` points at
    fn head_commit(&self, repo_path: &Path) -> Result<String>;

    /// Names of all local tags
    fn list_tags(&self, repo_path: &Path) -> Result<Vec<String>>;

    /// Branch names (without `refs/heads/`) that exist on `remote`
    ///
    /// Queries the remote itself, not local tracking refs.
    fn remote_branches(&self, repo_path: &Path, remote: &str) -> Result<Vec<String>>;
}
