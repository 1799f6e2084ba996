// tests/release_flow_test.rs
//
// Full tag-and-validate run over two component repositories and a
// consuming project, all backed by local git remotes.
use release_tools::config::{Config, GitConfig, LockConfig, RepositoryRef};
use release_tools::git::Git2Reader;
use release_tools::git_ops::RepoTagger;
use release_tools::lockfile::{ComposerLock, ComposerManifest};
use release_tools::process::SystemRunner;
use release_tools::release::{DependencyResolver, ReleaseOrchestrator, ReleaseState};
use release_tools::{ReleaseError, Result};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

/// Resolves every package to the commit its tag points at on the remote,
/// the way a package index would once it has seen the push
struct TagIndexResolver {
    tag: String,
    packages: Vec<(String, PathBuf)>,
}

impl DependencyResolver for TagIndexResolver {
    fn regenerate(&self, project_root: &Path) -> Result<()> {
        let mut packages = Vec::new();
        for (name, remote) in &self.packages {
            let reference = git(remote, &["rev-parse", &format!("refs/tags/{}^{{commit}}", self.tag)]);
            packages.push(json!({
                "name": name,
                "version": self.tag,
                "source": {"type": "git", "url": remote, "reference": reference},
                "dist": {"type": "zip", "reference": reference}
            }));
        }
        let lock = json!({"packages": packages, "packages-dev": []});
        fs::write(project_root.join("composer.lock"), serde_json::to_string_pretty(&lock)?)?;
        Ok(())
    }
}

struct Setup {
    _base: tempfile::TempDir,
    config: Config,
    release_remote: PathBuf,
    remotes: Vec<(String, PathBuf)>,
}

fn setup() -> Setup {
    let base = tempfile::tempdir().unwrap();
    let root = base.path();
    let mut repos = Vec::new();
    let mut remotes = Vec::new();

    for name in ["core", "administration"] {
        let remote = root.join(format!("remotes/{}.git", name));
        let work = root.join(format!("repos/{}", name));
        fs::create_dir_all(&remote).unwrap();
        fs::create_dir_all(&work).unwrap();
        git(&remote, &["init", "-q", "--bare", "."]);
        git(&work, &["init", "-q", "-b", "trunk", "."]);
        fs::write(work.join("README"), name).unwrap();
        git(&work, &["add", "README"]);
        git(&work, &["commit", "-q", "-m", "initial"]);

        repos.push(RepositoryRef {
            name: name.to_string(),
            path: work,
            remote_url: remote.to_str().unwrap().to_string(),
            read_url: None,
        });
        remotes.push((format!("shopware/{}", name), remote));
    }

    let core_head = git(&repos[0].path, &["rev-parse", "HEAD"]);
    fs::write(repos[0].path.join("PLATFORM_COMMIT_SHA"), &core_head).unwrap();

    let project = root.join("production");
    let release_remote = root.join("remotes/production.git");
    fs::create_dir_all(&project).unwrap();
    fs::create_dir_all(&release_remote).unwrap();
    git(&release_remote, &["init", "-q", "--bare", "."]);
    git(&project, &["init", "-q", "-b", "trunk", "."]);
    fs::write(
        project.join("composer.json"),
        serde_json::to_string_pretty(&json!({
            "name": "shopware/production",
            "require": {"shopware/core": "~6.3.0", "shopware/administration": "~6.3.0"},
            "minimum-stability": "dev"
        }))
        .unwrap(),
    )
    .unwrap();
    git(&project, &["add", "composer.json"]);
    git(&project, &["commit", "-q", "-m", "initial"]);

    let config = Config {
        project_root: project,
        release_remote_url: Some(release_remote.to_str().unwrap().to_string()),
        repos,
        lock: LockConfig {
            initial_wait_secs: 0,
            retry_wait_secs: 0,
            max_attempts: 2,
            ..LockConfig::default()
        },
        git: GitConfig {
            user_name: Some("Release Bot".to_string()),
            user_email: Some("release@example.com".to_string()),
            ..GitConfig::default()
        },
        ..Config::default()
    };

    Setup {
        _base: base,
        config,
        release_remote,
        remotes,
    }
}

fn orchestrator(setup: &Setup, tag: &str) -> ReleaseOrchestrator {
    let tagger = RepoTagger::new(Arc::new(SystemRunner), false, &setup.config.git);
    let resolver = TagIndexResolver {
        tag: tag.to_string(),
        packages: setup.remotes.clone(),
    };
    ReleaseOrchestrator::new(
        setup.config.clone(),
        tagger,
        Arc::new(Git2Reader::new()),
        Arc::new(resolver),
    )
}

#[test]
fn test_release_tags_pins_project_to_tagged_commits() {
    let setup = setup();
    let tag = "v6.3.1.0";
    let mut orchestrator = orchestrator(&setup, tag);

    let tagged = orchestrator.release_tags(tag).unwrap();
    assert_eq!(tagged, vec!["core", "administration"]);
    assert_eq!(orchestrator.state(), ReleaseState::ManifestValidated);

    let project = &setup.config.project_root;
    let lock = ComposerLock::read(&project.join("composer.lock")).unwrap();
    for repo in &setup.config.repos {
        let head = git(&repo.path, &["rev-parse", "HEAD"]);
        let entry = lock.find_package(&format!("shopware/{}", repo.name)).unwrap();
        assert_eq!(entry.reference(), Some(head.as_str()));
        assert_eq!(git(&repo.path, &["rev-parse", &format!("{}^{{}}", tag)]), head);
    }

    assert_eq!(
        fs::read_to_string(project.join("public/recovery/install/data/version")).unwrap(),
        tag
    );
    assert_eq!(
        fs::read_to_string(project.join("PLATFORM_COMMIT_SHA")).unwrap(),
        git(&setup.config.repos[0].path, &["rev-parse", "HEAD"])
    );
    let manifest = ComposerManifest::read(&project.join("composer.json")).unwrap();
    assert_eq!(manifest.minimum_stability(), Some("stable"));

    let branch_head = git(&setup.release_remote, &["rev-parse", "refs/heads/release/v6.3.1.0"]);
    assert_eq!(git(&setup.release_remote, &["rev-parse", "v6.3.1.0^{commit}"]), branch_head);
    let committed = git(&setup.release_remote, &["show", "--name-only", "--format=", &branch_head]);
    for file in [
        "composer.json",
        "composer.lock",
        "public/recovery/install/data/version",
        "PLATFORM_COMMIT_SHA",
    ] {
        assert!(committed.lines().any(|line| line == file), "{} not committed", file);
    }
}

#[test]
fn test_partial_tagging_reports_pushed_repositories() {
    let mut setup = setup();
    setup.config.repos[1].remote_url = setup
        .release_remote
        .parent()
        .unwrap()
        .join("missing.git")
        .to_str()
        .unwrap()
        .to_string();
    let mut orchestrator = orchestrator(&setup, "v6.3.1.0");

    let err = orchestrator.release_tags("v6.3.1.0").unwrap_err();
    match err {
        ReleaseError::PartialTagging { failed, pushed, .. } => {
            assert_eq!(failed, "administration");
            assert_eq!(pushed, vec!["core"]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(orchestrator.state(), ReleaseState::Preparing);
    assert!(!setup.config.project_root.join("public").exists());
}
