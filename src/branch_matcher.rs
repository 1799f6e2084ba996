use crate::domain::{BranchCandidates, Version};
use crate::error::{ReleaseError, Result};
use crate::git::GitReader;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Finds the branch a tag should be released from
pub struct BranchMatcher {
    reader: Arc<dyn GitReader>,
    development_branch: String,
    remote: String,
}

impl BranchMatcher {
    pub fn new(reader: Arc<dyn GitReader>, development_branch: impl Into<String>) -> Self {
        BranchMatcher {
            reader,
            development_branch: development_branch.into(),
            remote: "origin".to_string(),
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Most specific candidate branch of `tag` that exists on the remote of `repo`
    pub fn best_matching_branch(&self, tag: &str, repo: &Path) -> Result<String> {
        let version = Version::parse_tag(tag)?;
        let candidates = BranchCandidates::for_version(&version, &self.development_branch);
        let existing = self.reader.remote_branches(repo, &self.remote)?;

        debug!(
            "Branch candidates for {}: {}",
            tag,
            candidates.names.join(", ")
        );

        candidates
            .first_existing(&existing)
            .map(str::to_string)
            .ok_or_else(|| ReleaseError::remote(format!("No matching branch found for {}", tag)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::MockGitReader;

    fn matcher(branches: &[&str]) -> BranchMatcher {
        let mut reader = MockGitReader::new();
        for branch in branches {
            reader.add_remote_branch("platform", *branch);
        }
        BranchMatcher::new(Arc::new(reader), "trunk")
    }

    fn best(branches: &[&str], tag: &str) -> String {
        matcher(branches)
            .best_matching_branch(tag, Path::new("platform"))
            .unwrap()
    }

    #[test]
    fn test_best_matching_branch_table() {
        assert_eq!(best(&["6.2"], "6.2.4"), "6.2");
        assert_eq!(best(&["6.2"], "6.2.0-rc2"), "6.2");
        assert_eq!(best(&["6.2", "6.2.4"], "6.2.4"), "6.2.4");
        assert_eq!(best(&["6.3"], "6.3.0.0"), "6.3");
        assert_eq!(best(&["6.3", "6.3.0"], "6.3.0.0"), "6.3.0");
        assert_eq!(best(&["6.3", "6.3.0", "6.3.0.0"], "6.3.0.0"), "6.3.0.0");
        assert_eq!(best(&["6.3", "6.3.1", "6.3.0.1"], "6.3.2.0"), "6.3");
        assert_eq!(
            best(&["trunk", "6.3.1", "6.3.3", "6.3.2.1"], "6.3.2.0"),
            "trunk"
        );
    }

    #[test]
    fn test_legacy_tag_without_branch_fails() {
        let err = matcher(&["trunk"])
            .best_matching_branch("6.2.0", Path::new("platform"))
            .unwrap_err();
        assert!(err.to_string().contains("No matching branch found"));
    }

    #[test]
    fn test_invalid_tag_is_rejected() {
        let err = matcher(&["trunk"])
            .best_matching_branch("release-1", Path::new("platform"))
            .unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidTag(_)));
    }
}
