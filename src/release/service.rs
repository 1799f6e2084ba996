use crate::config::{Config, LockConfig};
use crate::domain::{Constraint, Stability, Version};
use crate::error::{ReleaseError, Result};
use crate::git::GitReader;
use crate::git_ops::RepoTagger;
use crate::lockfile::{update_stability, validate_package, ComposerLock, ComposerManifest, LOCK_FILE, MANIFEST_FILE};
use crate::process::{CommandSpec, ProcessRunner};
use crate::release::{ReleasePreparer, ReleaseState};
use crate::release_list::ReleaseEntry;
use crate::resolver::TagResolver;
use crate::warning::ReleaseWarning;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Regenerates the lock file of the consuming project
pub trait DependencyResolver: Send + Sync {
    fn regenerate(&self, project_root: &Path) -> Result<()>;
}

/// [DependencyResolver] running the configured composer command
///
/// The installed copies of the managed packages are removed first so the
/// resolver cannot reuse them.
pub struct ComposerResolver {
    runner: Arc<dyn ProcessRunner>,
    lock: LockConfig,
    vendor: String,
}

impl ComposerResolver {
    pub fn new(runner: Arc<dyn ProcessRunner>, lock: LockConfig, vendor: impl Into<String>) -> Self {
        ComposerResolver {
            runner,
            lock,
            vendor: vendor.into(),
        }
    }
}

impl DependencyResolver for ComposerResolver {
    fn regenerate(&self, project_root: &Path) -> Result<()> {
        let installed = project_root.join("vendor").join(&self.vendor);
        if installed.exists() {
            debug!("Removing {}", installed.display());
            fs::remove_dir_all(&installed)?;
        }

        let spec = CommandSpec::from_argv(&self.lock.command)?
            .current_dir(project_root)
            .timeout(Some(self.lock.timeout()));
        self.runner.run_checked(&spec)?;
        Ok(())
    }
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Drives a release from tagging the component repositories to publishing
pub struct ReleaseOrchestrator {
    config: Config,
    tagger: RepoTagger,
    reader: Arc<dyn GitReader>,
    resolver: Arc<dyn DependencyResolver>,
    sleeper: Arc<dyn Sleeper>,
    preparer: Option<ReleasePreparer>,
    state: ReleaseState,
}

impl ReleaseOrchestrator {
    pub fn new(
        config: Config,
        tagger: RepoTagger,
        reader: Arc<dyn GitReader>,
        resolver: Arc<dyn DependencyResolver>,
    ) -> Self {
        ReleaseOrchestrator {
            config,
            tagger,
            reader,
            resolver,
            sleeper: Arc::new(ThreadSleeper),
            preparer: None,
            state: ReleaseState::Preparing,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_preparer(mut self, preparer: ReleasePreparer) -> Self {
        self.preparer = Some(preparer);
        self
    }

    pub fn state(&self) -> ReleaseState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn advance(&mut self, state: ReleaseState, tag: &str) {
        info!("Release {}: {} -> {}", tag, self.state, state);
        self.state = state;
    }

    fn manifest_path(&self) -> PathBuf {
        self.config.project_root.join(MANIFEST_FILE)
    }

    /// Constraint on the pinned package required by the project manifest
    pub fn project_constraint(&self) -> Result<Constraint> {
        let package = self
            .config
            .repository(&self.config.pin_repository)?
            .package_name(&self.config.package_vendor);
        let manifest = ComposerManifest::read(&self.manifest_path())?;
        let text = manifest.required_constraint(&package).ok_or_else(|| {
            ReleaseError::config(format!(
                "{} does not require {}",
                self.manifest_path().display(),
                package
            ))
        })?;
        Constraint::parse(text)
    }

    /// Next tag of the pinned repository
    ///
    /// Without an explicit constraint the project manifest decides.
    pub fn next_tag(&self, constraint: Option<&Constraint>, is_minor_release: bool) -> Result<Version> {
        let constraint = match constraint {
            Some(c) => c.clone(),
            None => self.project_constraint()?,
        };
        let repo = self.config.repository(&self.config.pin_repository)?;
        let tags = self.reader.list_tags(&repo.path)?;
        TagResolver::from_stability(&self.config.stability)?.resolve_next_tag(&tags, &constraint, is_minor_release)
    }

    /// Tag every repository, pin the project to the tag and push the
    /// release branch
    ///
    /// Returns the repositories that were tagged.
    pub fn release_tags(&mut self, tag: &str) -> Result<Vec<String>> {
        Version::parse_tag(tag)?;
        let stability: Stability = self.config.stability.parse()?;
        let remote_url = self
            .config
            .release_remote_url
            .clone()
            .ok_or_else(|| ReleaseError::config("release_remote_url is required to push the release branch"))?;
        self.state = ReleaseState::Preparing;

        self.copy_pin_file()?;

        let pushed = self.tagger.tag_and_push_repos(tag, &self.config.repos)?;
        self.advance(ReleaseState::Tagged, tag);

        update_stability(&self.manifest_path(), stability)?;
        let attempts = self.update_lock(tag)?;
        info!("Lock file points at {} after {} attempt(s)", tag, attempts);
        self.advance(ReleaseState::ManifestValidated, tag);

        self.write_installer_version(tag)?;

        let files = vec![
            PathBuf::from(MANIFEST_FILE),
            PathBuf::from(LOCK_FILE),
            self.config.installer_version_file.clone(),
            PathBuf::from(&self.config.pin_file),
        ];
        self.tagger
            .create_release_branch(&self.config.project_root, tag, &remote_url, &files)?;

        Ok(pushed)
    }

    /// Tag, validate and publish `tag`
    pub fn release(&mut self, tag: &str) -> Result<ReleaseEntry> {
        let preparer = self
            .preparer
            .take()
            .ok_or_else(|| ReleaseError::config("No release preparer configured"))?;
        let outcome = self
            .release_tags(tag)
            .and_then(|_| preparer.prepare_release(tag));
        self.preparer = Some(preparer);

        let entry = outcome?;
        self.advance(ReleaseState::Published, tag);
        Ok(entry)
    }

    fn copy_pin_file(&self) -> Result<()> {
        let repo = self.config.repository(&self.config.pin_repository)?;
        let source = repo.path.join(&self.config.pin_file);
        let target = self.config.project_root.join(&self.config.pin_file);
        fs::copy(&source, &target).map_err(|e| {
            ReleaseError::config(format!(
                "Could not copy {} to {}: {}",
                source.display(),
                target.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn write_installer_version(&self, tag: &str) -> Result<()> {
        let path = self.config.project_root.join(&self.config.installer_version_file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, tag)?;
        Ok(())
    }

    /// Regenerate the lock file until every managed package resolves to
    /// `tag` at the repository's HEAD
    ///
    /// Returns the number of attempts used.
    pub fn update_lock(&self, tag: &str) -> Result<u32> {
        let lock = &self.config.lock;
        self.sleeper.sleep(lock.initial_wait());

        for attempt in 1..=lock.max_attempts {
            self.sleeper.sleep(lock.retry_wait());

            match self.lock_attempt(tag, attempt) {
                Ok(true) => return Ok(attempt),
                Ok(false) => {}
                Err(err) if err.is_transient() => {
                    ReleaseWarning::LockDrift {
                        package: format!("{}/*", self.config.package_vendor),
                        attempt,
                        reason: err.to_string(),
                    }
                    .emit();
                }
                Err(err) => return Err(err),
            }
        }

        Err(ReleaseError::LockNotConverged {
            attempts: lock.max_attempts,
        })
    }

    fn lock_attempt(&self, tag: &str, attempt: u32) -> Result<bool> {
        let project_root = &self.config.project_root;
        self.resolver.regenerate(project_root)?;
        let lock = ComposerLock::read(&project_root.join(LOCK_FILE))?;

        for repo in &self.config.repos {
            let package = repo.package_name(&self.config.package_vendor);
            let Some(entry) = lock.find_package(&package) else {
                ReleaseWarning::LockDrift {
                    package,
                    attempt,
                    reason: "missing from lock file".to_string(),
                }
                .emit();
                return Ok(false);
            };

            let head = self.reader.head_commit(&repo.path)?;
            if !validate_package(entry, tag, Some(&head))? {
                ReleaseWarning::LockDrift {
                    package,
                    attempt,
                    reason: format!("resolved to {}", entry.version),
                }
                .emit();
                return Ok(false);
            }
        }
        Ok(true)
    }
}
