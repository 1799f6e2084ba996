//! Workflows behind the command line
//!
//! Each subcommand maps to one function here. They take plain arguments so
//! they can be driven without clap, and build their services from a
//! [ReleaseContext].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::branch_matcher::BranchMatcher;
use crate::changelog::JsonChangelog;
use crate::config::Config;
use crate::domain::{Constraint, Version};
use crate::error::{ReleaseError, Result};
use crate::git::{Git2Reader, GitReader};
use crate::git_ops::RepoTagger;
use crate::lockfile::{ComposerManifest, MANIFEST_FILE};
use crate::process::{ProcessRunner, SystemRunner};
use crate::release::{non_critical, ComposerResolver, ReleaseOrchestrator, ReleasePreparer};
use crate::release_list::ReleaseEntry;
use crate::storage::LocalStorage;
use crate::update_api::CommandUpdateApi;
use crate::version_tracker::{SbpClient, VersionTracker};

/// Configuration plus the process runner and repository reader every
/// workflow shares
pub struct ReleaseContext {
    pub config: Config,
    pub runner: Arc<dyn ProcessRunner>,
    pub reader: Arc<dyn GitReader>,
}

impl ReleaseContext {
    /// Context talking to the real `git`, `composer` and filesystem
    pub fn new(config: Config) -> Self {
        let reader = match &config.git.ssh_key {
            Some(key) => Git2Reader::new().with_ssh_key(key),
            None => Git2Reader::new(),
        };
        ReleaseContext {
            config,
            runner: Arc::new(SystemRunner),
            reader: Arc::new(reader),
        }
    }

    pub fn with_services(config: Config, runner: Arc<dyn ProcessRunner>, reader: Arc<dyn GitReader>) -> Self {
        ReleaseContext {
            config,
            runner,
            reader,
        }
    }

    pub fn tagger(&self) -> RepoTagger {
        RepoTagger::new(self.runner.clone(), self.config.sign, &self.config.git)
    }

    pub fn preparer(&self) -> Result<ReleasePreparer> {
        let deploy = &self.config.deploy;
        let update_api = CommandUpdateApi::from_config(self.runner.clone(), &self.config.update_api)?;
        let mut preparer = ReleasePreparer::new(
            &self.config,
            Arc::new(LocalStorage::new(&deploy.artifacts_dir)),
            Arc::new(LocalStorage::new(&deploy.deploy_dir)),
            Arc::new(update_api),
        );

        if let Some(path) = &self.config.changelog_file {
            preparer = preparer.with_changelog(Arc::new(JsonChangelog::new(path)));
        }
        if let Some(tracker) = self.version_tracker() {
            preparer = preparer.with_version_tracker(tracker);
        }
        Ok(preparer)
    }

    /// Version tracker when configured and reachable
    fn version_tracker(&self) -> Option<Arc<dyn VersionTracker>> {
        if self.config.version_tracker.base_uri.is_none() {
            debug!("No version tracker configured");
            return None;
        }
        non_critical("version tracker login", || {
            SbpClient::from_config(&self.config.version_tracker)
        })
        .map(|client| Arc::new(client) as Arc<dyn VersionTracker>)
    }

    pub fn orchestrator(&self) -> ReleaseOrchestrator {
        let resolver = ComposerResolver::new(
            self.runner.clone(),
            self.config.lock.clone(),
            self.config.package_vendor.clone(),
        );
        ReleaseOrchestrator::new(
            self.config.clone(),
            self.tagger(),
            self.reader.clone(),
            Arc::new(resolver),
        )
    }
}

/// Arguments of `next-tag`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NextTagArgs {
    /// Constraint on the pinned package; the project manifest's otherwise
    pub constraint: Option<String>,
    /// Overrides the project manifest's `minimum-stability`
    pub minimum_stability: Option<String>,
    pub minor: bool,
}

pub fn next_tag(ctx: &ReleaseContext, args: &NextTagArgs) -> Result<Version> {
    let mut config = ctx.config.clone();
    config.stability = match &args.minimum_stability {
        Some(stability) => stability.clone(),
        None => project_stability(&config.project_root)?.unwrap_or_else(|| config.stability.clone()),
    };

    let constraint = args.constraint.as_deref().map(Constraint::parse).transpose()?;
    let orchestrator = ReleaseContext::with_services(config, ctx.runner.clone(), ctx.reader.clone()).orchestrator();
    orchestrator.next_tag(constraint.as_ref(), args.minor)
}

fn project_stability(project_root: &Path) -> Result<Option<String>> {
    let path = project_root.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    Ok(ComposerManifest::read(&path)?
        .minimum_stability()
        .map(str::to_string))
}

pub fn matching_branch(ctx: &ReleaseContext, tag: &str, repo: &Path) -> Result<String> {
    BranchMatcher::new(ctx.reader.clone(), ctx.config.development_branch.clone()).best_matching_branch(tag, repo)
}

pub fn release_info(ctx: &ReleaseContext, tag: &str) -> Result<Value> {
    let list = ctx.preparer()?.release_list()?;
    list.get_release(tag)?
        .map(ReleaseEntry::to_json)
        .ok_or_else(|| ReleaseError::TagNotFound(tag.to_string()))
}

pub fn release_tags(ctx: &ReleaseContext, tag: &str) -> Result<Vec<String>> {
    ctx.orchestrator().release_tags(tag)
}

pub fn prepare_release(ctx: &ReleaseContext, tag: &str) -> Result<ReleaseEntry> {
    Version::parse_tag(tag)?;
    ctx.preparer()?.prepare_release(tag)
}

pub fn release_package(ctx: &ReleaseContext, tag: &str) -> Result<ReleaseEntry> {
    ctx.preparer()?.release_package(tag)
}

/// Tag, validate and publish in one run
pub fn release(ctx: &ReleaseContext, tag: &str) -> Result<ReleaseEntry> {
    Version::parse_tag(tag)?;
    let mut orchestrator = ctx.orchestrator().with_preparer(ctx.preparer()?);
    orchestrator.release(tag)
}

/// Arguments of `fetch-tag-push`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchTagPushArgs {
    pub tag: String,
    pub commit: String,
    pub remote: String,
    pub url: Option<String>,
    /// Existing checkout; a temporary bare repository otherwise
    pub repo: Option<PathBuf>,
    pub message: Option<String>,
    /// Configured repository to tag; its `read_url` is fetched and the tag
    /// goes to its release remote
    pub repository: Option<String>,
}

pub fn fetch_tag_push(ctx: &ReleaseContext, args: &FetchTagPushArgs) -> Result<()> {
    Version::parse_tag(&args.tag)?;

    if let Some(name) = &args.repository {
        let repo = ctx
            .config
            .repos
            .iter()
            .find(|r| &r.name == name)
            .ok_or_else(|| ReleaseError::config(format!("Unknown repository: {}", name)))?;
        return ctx.tagger().fetch_tag_push_repo(
            &args.tag,
            &args.commit,
            repo,
            args.url.as_deref(),
            args.message.as_deref(),
        );
    }

    ctx.tagger().fetch_tag_push(
        &args.tag,
        &args.commit,
        &args.remote,
        args.repo.as_deref(),
        args.url.as_deref(),
        args.message.as_deref(),
    )
}

/// Delete `tag` in every managed repository
pub fn delete_tag(ctx: &ReleaseContext, tag: &str, remote: bool) -> Result<Vec<String>> {
    ctx.tagger().delete_tag_in_repos(tag, &ctx.config.repos, remote)
}
