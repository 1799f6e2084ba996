use crate::error::{ReleaseError, Result};
use crate::git::GitReader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Mock reader for testing without actual repositories
#[derive(Debug, Default)]
pub struct MockGitReader {
    heads: Mutex<HashMap<PathBuf, String>>,
    tags: HashMap<PathBuf, Vec<String>>,
    branches: HashMap<PathBuf, Vec<String>>,
}

impl MockGitReader {
    /// Create a new empty mock reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the HEAD commit of a repository
    pub fn set_head(&self, repo: impl Into<PathBuf>, sha: impl Into<String>) {
        if let Ok(mut heads) = self.heads.lock() {
            heads.insert(repo.into(), sha.into());
        }
    }

    /// Add a tag to a repository
    pub fn add_tag(&mut self, repo: impl Into<PathBuf>, tag: impl Into<String>) {
        self.tags.entry(repo.into()).or_default().push(tag.into());
    }

    /// Add a branch to a repository's remote
    pub fn add_remote_branch(&mut self, repo: impl Into<PathBuf>, branch: impl Into<String>) {
        self.branches
            .entry(repo.into())
            .or_default()
            .push(branch.into());
    }
}

impl GitReader for MockGitReader {
    fn head_commit(&self, repo_path: &Path) -> Result<String> {
        self.heads
            .lock()
            .ok()
            .and_then(|heads| heads.get(repo_path).cloned())
            .ok_or_else(|| {
                ReleaseError::remote(format!("No HEAD for {}", repo_path.display()))
            })
    }

    fn list_tags(&self, repo_path: &Path) -> Result<Vec<String>> {
        Ok(self.tags.get(repo_path).cloned().unwrap_or_default())
    }

    fn remote_branches(&self, repo_path: &Path, _remote: &str) -> Result<Vec<String>> {
        Ok(self.branches.get(repo_path).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_heads() {
        let reader = MockGitReader::new();
        reader.set_head("repos/core", "abc123");
        assert_eq!(reader.head_commit(Path::new("repos/core")).unwrap(), "abc123");
        assert!(reader.head_commit(Path::new("repos/storefront")).is_err());

        reader.set_head("repos/core", "def456");
        assert_eq!(reader.head_commit(Path::new("repos/core")).unwrap(), "def456");
    }

    #[test]
    fn test_mock_tags_and_branches() {
        let mut reader = MockGitReader::new();
        reader.add_tag("repos/core", "v6.3.0.0");
        reader.add_remote_branch("repos/core", "trunk");

        assert_eq!(reader.list_tags(Path::new("repos/core")).unwrap(), vec!["v6.3.0.0"]);
        assert_eq!(
            reader.remote_branches(Path::new("repos/core"), "origin").unwrap(),
            vec!["trunk"]
        );
        assert!(reader.list_tags(Path::new("repos/other")).unwrap().is_empty());
    }
}
