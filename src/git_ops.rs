use crate::config::{GitConfig, RepositoryRef};
use crate::error::{ReleaseError, Result};
use crate::process::{CommandOutput, CommandSpec, ProcessRunner};
use crate::warning::ReleaseWarning;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Remote the release branch and the component tags are pushed to
pub const RELEASE_REMOTE: &str = "release";

/// Tag, push and branch operations across the managed repositories.
///
/// Every call shells out to the `git` binary so signing keys, credential
/// helpers and SSH configuration of the operator apply. The signing mode is
/// fixed at construction: signed tags/commits when enabled, explicitly
/// unsigned otherwise.
pub struct RepoTagger {
    runner: Arc<dyn ProcessRunner>,
    sign: bool,
    timeout: Duration,
    user_name: Option<String>,
    user_email: Option<String>,
}

impl RepoTagger {
    pub fn new(runner: Arc<dyn ProcessRunner>, sign: bool, git: &GitConfig) -> Self {
        RepoTagger {
            runner,
            sign,
            timeout: git.timeout(),
            user_name: git.user_name.clone(),
            user_email: git.user_email.clone(),
        }
    }

    pub fn is_signing(&self) -> bool {
        self.sign
    }

    /// `git` invocation inside `repo` with identity overrides and the
    /// per-call timeout applied
    fn git(&self, repo: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new("git")
            .current_dir(repo)
            .timeout(Some(self.timeout))
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(name) = &self.user_name {
            spec = spec.args(["-c".to_string(), format!("user.name={}", name)]);
        }
        if let Some(email) = &self.user_email {
            spec = spec.args(["-c".to_string(), format!("user.email={}", email)]);
        }
        spec
    }

    fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        debug!("git: {}", spec.display());
        self.runner.run_checked(&spec)
    }

    /// Create an annotated tag at HEAD of `repo`
    ///
    /// With `force`, an existing local tag of the same name is deleted
    /// first; its absence is not an error.
    pub fn create_tag(&self, tag: &str, repo: &Path, message: Option<&str>, force: bool) -> Result<()> {
        if force {
            self.delete_tag(tag, repo)?;
        }

        let message = message.unwrap_or(tag);
        let spec = if self.sign {
            self.git(repo).args(["tag", "-s", tag, "-m", message])
        } else {
            self.git(repo)
                .args(["-c", "tag.gpgSign=false", "tag", "-a", tag, "-m", message])
        };
        self.run(spec)?;

        info!("Created tag {} in {}", tag, repo.display());
        Ok(())
    }

    /// Delete a local tag
    ///
    /// Returns `false` when the tag did not exist.
    pub fn delete_tag(&self, tag: &str, repo: &Path) -> Result<bool> {
        let spec = self.git(repo).args(["tag", "-d", tag]);
        let output = self.runner.run(&spec)?;

        if output.success() {
            debug!("Deleted tag {} in {}", tag, repo.display());
            return Ok(true);
        }
        if output.stderr.contains("not found") {
            ReleaseWarning::TagAlreadyAbsent {
                tag: tag.to_string(),
                repository: repo.display().to_string(),
            }
            .emit();
            return Ok(false);
        }
        if output.timed_out {
            return Err(ReleaseError::Timeout {
                command: spec.display(),
                timeout: self.timeout,
            });
        }
        Err(ReleaseError::Process {
            command: spec.display(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }

    /// Make `remote` point at `url`, re-adding it when it differs
    pub fn ensure_remote(&self, repo: &Path, remote: &str, url: &str) -> Result<()> {
        let current = self
            .runner
            .run(&self.git(repo).args(["remote", "get-url", remote]))?;

        if current.success() {
            if current.stdout.trim() == url {
                return Ok(());
            }
            self.run(self.git(repo).args(["remote", "remove", remote]))?;
        }

        self.run(self.git(repo).args(["remote", "add", remote, url]))?;
        debug!("Remote {} of {} set to {}", remote, repo.display(), url);
        Ok(())
    }

    /// Push `local_ref` (default `refs/tags/<tag>`) to `refs/tags/<tag>` on `remote`
    pub fn push_tag(
        &self,
        tag: &str,
        repo: &Path,
        remote: &str,
        url: Option<&str>,
        local_ref: Option<&str>,
    ) -> Result<()> {
        if let Some(url) = url {
            self.ensure_remote(repo, remote, url)?;
        }

        let local_ref = local_ref
            .map(str::to_string)
            .unwrap_or_else(|| format!("refs/tags/{}", tag));
        let refspec = format!("{}:refs/tags/{}", local_ref, tag);
        self.run(self.git(repo).args(["push", remote, refspec.as_str()]))?;

        info!("Pushed tag {} to {}", tag, remote);
        Ok(())
    }

    /// Delete a tag from `remote`
    pub fn delete_remote_tag(&self, tag: &str, repo: &Path, remote: &str, url: Option<&str>) -> Result<()> {
        if let Some(url) = url {
            self.ensure_remote(repo, remote, url)?;
        }
        let refspec = format!(":refs/tags/{}", tag);
        self.run(self.git(repo).args(["push", remote, refspec.as_str()]))?;
        info!("Deleted tag {} on {}", tag, remote);
        Ok(())
    }

    /// Materialise a single commit at `path` with a shallow fetch
    pub fn clone_or_fetch(
        &self,
        commit_ref: &str,
        path: &Path,
        remote: &str,
        url: Option<&str>,
        bare: bool,
    ) -> Result<()> {
        fs::create_dir_all(path)?;

        let init = if bare {
            self.git(path).args(["init", "--bare"])
        } else {
            self.git(path).arg("init")
        };
        self.run(init)?;

        if let Some(url) = url {
            self.ensure_remote(path, remote, url)?;
        }

        self.run(self.git(path).args(["fetch", "--depth=1", remote, commit_ref]))?;
        self.run(self.git(path).args(["reset", "--soft", "FETCH_HEAD"]))?;

        if !bare {
            self.run(self.git(path).args(["checkout", "HEAD", "--", "."]))?;
        }

        debug!("Fetched {} into {}", commit_ref, path.display());
        Ok(())
    }

    /// Tag `commit_ref` of a remote and push the tag, without a full clone
    ///
    /// A temporary bare repository is used unless `repo` is given; it is
    /// removed on every exit path.
    pub fn fetch_tag_push(
        &self,
        tag: &str,
        commit_ref: &str,
        remote: &str,
        repo: Option<&Path>,
        url: Option<&str>,
        message: Option<&str>,
    ) -> Result<()> {
        let scratch;
        let path: PathBuf = match repo {
            Some(path) => path.to_path_buf(),
            None => {
                scratch = tempfile::Builder::new().prefix("release-tag-").tempdir()?;
                scratch.path().to_path_buf()
            }
        };

        let bare = repo.is_none();
        self.clone_or_fetch(commit_ref, &path, remote, url, bare)?;
        self.create_tag(tag, &path, message, true)?;
        self.push_tag(tag, &path, remote, None, None)
    }

    /// Tag `commit_ref` of a managed repository without its checkout
    ///
    /// The commit is fetched from `fetch_url`, else the repository's
    /// `read_url`, else its `remote_url`, into a temporary bare repository.
    /// The tag always goes to `remote_url` on the release remote.
    pub fn fetch_tag_push_repo(
        &self,
        tag: &str,
        commit_ref: &str,
        repo: &RepositoryRef,
        fetch_url: Option<&str>,
        message: Option<&str>,
    ) -> Result<()> {
        let read_url = fetch_url
            .or(repo.read_url.as_deref())
            .unwrap_or(repo.remote_url.as_str());
        let scratch = tempfile::Builder::new().prefix("release-tag-").tempdir()?;

        self.clone_or_fetch(commit_ref, scratch.path(), "origin", Some(read_url), true)?;
        self.create_tag(tag, scratch.path(), message, true)?;
        self.push_tag(tag, scratch.path(), RELEASE_REMOTE, Some(repo.remote_url.as_str()), None)?;

        info!("Tagged {} of {} as {}", commit_ref, repo.name, tag);
        Ok(())
    }

    /// Tag HEAD of every repository and push to its release remote, in order
    ///
    /// Stops at the first failure. Tags already pushed stay in place and are
    /// listed in the error.
    pub fn tag_and_push_repos(&self, tag: &str, repos: &[RepositoryRef]) -> Result<Vec<String>> {
        let mut pushed = Vec::new();

        for repo in repos {
            let outcome = self
                .create_tag(tag, &repo.path, None, true)
                .and_then(|_| self.push_tag(tag, &repo.path, RELEASE_REMOTE, Some(repo.remote_url.as_str()), None));

            if let Err(err) = outcome {
                return Err(ReleaseError::PartialTagging {
                    tag: tag.to_string(),
                    failed: repo.name.clone(),
                    pushed,
                    reason: err.to_string(),
                });
            }
            pushed.push(repo.name.clone());
        }

        Ok(pushed)
    }

    /// Delete a tag in every repository, locally and optionally on the release remote
    ///
    /// Returns the names of the repositories that had the tag locally.
    pub fn delete_tag_in_repos(&self, tag: &str, repos: &[RepositoryRef], remote: bool) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for repo in repos {
            if self.delete_tag(tag, &repo.path)? {
                deleted.push(repo.name.clone());
            }
            if remote {
                self.delete_remote_tag(tag, &repo.path, RELEASE_REMOTE, Some(repo.remote_url.as_str()))?;
            }
        }
        Ok(deleted)
    }

    /// Commit the release files on `release/<tag>`, tag it and push branch
    /// and tags to the release remote
    pub fn create_release_branch(
        &self,
        project_root: &Path,
        tag: &str,
        remote_url: &str,
        files: &[PathBuf],
    ) -> Result<()> {
        let branch = format!("release/{}", tag);
        let message = format!("Release {}", tag);
        let wrap = |err: ReleaseError| ReleaseError::ReleaseBranch {
            tag: tag.to_string(),
            reason: err.to_string(),
        };

        self.run(self.git(project_root).args(["checkout", "-B", branch.as_str()]))
            .map_err(wrap)?;

        let mut add = self.git(project_root).args(["add", "--"]);
        for file in files {
            add = add.arg(file.to_string_lossy().to_string());
        }
        self.run(add).map_err(wrap)?;

        let commit = if self.sign {
            self.git(project_root).args(["commit", "-S", "-m", message.as_str()])
        } else {
            self.git(project_root)
                .args(["commit", "--no-gpg-sign", "-m", message.as_str()])
        };
        self.run(commit).map_err(wrap)?;

        self.create_tag(tag, project_root, Some(message.as_str()), true)
            .map_err(wrap)?;
        self.ensure_remote(project_root, RELEASE_REMOTE, remote_url)
            .map_err(wrap)?;
        self.run(
            self.git(project_root)
                .args(["push", RELEASE_REMOTE, branch.as_str(), "--tags"]),
        )
        .map_err(wrap)?;

        info!("Pushed release branch {}", branch);
        Ok(())
    }
}
