use crate::error::{ReleaseError, Result};
use crate::git::GitReader;
use git2::{Cred, CredentialType, Direction, RemoteCallbacks, Repository};
use std::path::{Path, PathBuf};
use tracing::debug;

/// [GitReader] backed by libgit2
#[derive(Debug, Default, Clone)]
pub struct Git2Reader {
    /// Private key tried before the usual `~/.ssh` keys
    ssh_key: Option<PathBuf>,
}

impl Git2Reader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ssh_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.ssh_key = Some(key.into());
        self
    }

    fn open(repo_path: &Path) -> Result<Repository> {
        Repository::open(repo_path).map_err(|e| {
            ReleaseError::remote(format!(
                "{} is not a readable repository: {}",
                repo_path.display(),
                e.message()
            ))
        })
    }

    /// SSH agent / key file credentials, falling back to git's defaults
    fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, username_from_url, allowed_types| {
            let username = username_from_url.unwrap_or("git");

            if allowed_types.contains(CredentialType::SSH_KEY) {
                let mut key_paths: Vec<PathBuf> = self.ssh_key.iter().cloned().collect();
                if let Some(home) = dirs::home_dir() {
                    for name in ["id_ed25519", "id_rsa", "id_ecdsa"] {
                        key_paths.push(home.join(".ssh").join(name));
                    }
                }

                for path in key_paths.iter().filter(|p| p.exists()) {
                    if let Ok(cred) = Cred::ssh_key(username, None, path, None) {
                        return Ok(cred);
                    }
                }

                if let Ok(cred) = Cred::ssh_key_from_agent(username) {
                    return Ok(cred);
                }
            }

            Cred::default()
        });
        callbacks
    }
}

impl GitReader for Git2Reader {
    fn head_commit(&self, repo_path: &Path) -> Result<String> {
        let repo = Self::open(repo_path)?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    fn list_tags(&self, repo_path: &Path) -> Result<Vec<String>> {
        let repo = Self::open(repo_path)?;
        let tags = repo.tag_names(None)?;
        Ok(tags.iter().flatten().map(|s| s.to_string()).collect())
    }

    fn remote_branches(&self, repo_path: &Path, remote: &str) -> Result<Vec<String>> {
        let repo = Self::open(repo_path)?;
        let mut remote = repo
            .find_remote(remote)
            .map_err(|e| ReleaseError::remote(format!("Cannot find remote: {}", e.message())))?;

        let connection = remote
            .connect_auth(Direction::Fetch, Some(self.callbacks()), None)
            .map_err(|e| ReleaseError::remote(format!("Cannot list remote: {}", e.message())))?;

        let branches: Vec<String> = connection
            .list()?
            .iter()
            .filter_map(|head| head.name().strip_prefix("refs/heads/"))
            .map(|name| name.to_string())
            .collect();

        debug!(
            "Remote of {} has {} branches",
            repo_path.display(),
            branches.len()
        );
        Ok(branches)
    }
}
