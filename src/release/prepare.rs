use crate::changelog::ChangelogSource;
use crate::config::{Config, DeployConfig};
use crate::domain::Version;
use crate::error::{ReleaseError, Result};
use crate::release::non_critical;
use crate::release_list::{ReleaseEntry, ReleaseList};
use crate::storage::{hash_and_upload, ArtifactStorage, Upload, UPLOAD_PREFIX};
use crate::update_api::{UpdateApi, UpdateParams};
use crate::version_tracker::{sync_release, VersionTracker};
use crate::warning::ReleaseWarning;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info};

/// Build outputs every release publishes
pub const ARCHIVES: [&str; 3] = ["install.zip", "update.zip", "install.tar.xz"];

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Publishes a tagged release: release list entry, downloads, update
/// service and version tracker
pub struct ReleasePreparer {
    minimum_version: String,
    deploy_config: DeployConfig,
    artifacts: Arc<dyn ArtifactStorage>,
    deploy: Arc<dyn ArtifactStorage>,
    update_api: Arc<dyn UpdateApi>,
    changelog: Option<Arc<dyn ChangelogSource>>,
    tracker: Option<Arc<dyn VersionTracker>>,
    clock: Clock,
}

impl ReleasePreparer {
    pub fn new(
        config: &Config,
        artifacts: Arc<dyn ArtifactStorage>,
        deploy: Arc<dyn ArtifactStorage>,
        update_api: Arc<dyn UpdateApi>,
    ) -> Self {
        ReleasePreparer {
            minimum_version: config.minimum_version.clone(),
            deploy_config: config.deploy.clone(),
            artifacts,
            deploy,
            update_api,
            changelog: None,
            tracker: None,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_changelog(mut self, source: Arc<dyn ChangelogSource>) -> Self {
        self.changelog = Some(source);
        self
    }

    pub fn with_version_tracker(mut self, tracker: Arc<dyn VersionTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn release_list(&self) -> Result<ReleaseList> {
        let path = &self.deploy_config.manifest_path;
        let mut content = String::new();
        self.deploy
            .read(path)
            .and_then(|mut reader| Ok(reader.read_to_string(&mut content)?))
            .map_err(|e| ReleaseError::manifest(format!("Could not read release list {}: {}", path, e)))?;
        ReleaseList::parse(&content)
    }

    pub fn store_release_list(&self, list: &ReleaseList) -> Result<()> {
        let xml = list.to_xml();
        self.deploy
            .put(&self.deploy_config.manifest_path, &mut xml.as_bytes())?;
        debug!("Stored release list {}", self.deploy_config.manifest_path);
        Ok(())
    }

    /// Create or refresh the private entry of `tag` and publish its
    /// downloads
    pub fn prepare_release(&self, tag: &str) -> Result<ReleaseEntry> {
        let version = Version::parse_tag(tag)?;
        self.check_artifacts()?;
        let mut list = self.release_list()?;

        if list.get_release(tag)?.is_none() {
            list.add_release(tag)?;
        }
        let release = list
            .get_release_mut(tag)?
            .ok_or_else(|| ReleaseError::TagNotFound(tag.to_string()))?;

        if release.is_public() {
            return Err(ReleaseError::AlreadyPublic(tag.to_string()));
        }

        self.set_release_properties(tag, &version, release);
        self.upload_archives(tag, &version, release)?;

        if !release.is_public() && !release.is_manual() {
            match &self.changelog {
                Some(source) => {
                    if let Some(changelog) = non_critical("changelog", || source.changelog(tag)) {
                        release.set_locales(&changelog);
                    }
                }
                None => debug!("No changelog source configured"),
            }
        } else {
            ReleaseWarning::ChangelogLocked {
                tag: tag.to_string(),
            }
            .emit();
        }

        let release = release.clone();
        self.store_release_list(&list)?;
        self.register_update(&version, &release)?;
        self.sync_version_tracker(&version);

        info!("Prepared release {}", tag);
        Ok(release)
    }

    /// Make the prepared entry of `tag` public and announce it
    pub fn release_package(&self, tag: &str) -> Result<ReleaseEntry> {
        let version = Version::parse_tag(tag)?;
        self.check_artifacts()?;
        let mut list = self.release_list()?;

        let release = list
            .get_release_mut(tag)?
            .ok_or_else(|| ReleaseError::TagNotFound(tag.to_string()))?;
        if release.is_public() {
            return Err(ReleaseError::AlreadyPublic(tag.to_string()));
        }

        release.make_public();
        release.set(
            "release_date",
            (self.clock)().format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        self.upload_archives(tag, &version, release)?;

        let release = release.clone();
        self.store_release_list(&list)?;
        self.register_update(&version, &release)?;

        info!("Released {}", tag);
        Ok(release)
    }

    fn check_artifacts(&self) -> Result<()> {
        let missing: Vec<&str> = ARCHIVES
            .iter()
            .copied()
            .filter(|name| !self.artifacts.exists(name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ReleaseError::config(format!(
                "Missing release artifacts: {}",
                missing.join(", ")
            )))
        }
    }

    fn set_release_properties(&self, tag: &str, version: &Version, release: &mut ReleaseEntry) {
        let browse = self.deploy_config.source_browse_url.trim_end_matches('/');

        release.set("minimum_version", self.minimum_version.as_str());
        release.make_private();
        release.set("ea", "0");
        release.set("revision", "");
        release.set("type", version.release_type().to_string());
        release.set("release_date", "");
        release.set("tag", tag);
        release.set("github_repo", format!("{}/tree/{}", browse, tag));
        release.set(
            "upgrade_md",
            format!("{}/blob/{}/UPGRADE-{}.md", browse, tag, version.major_branch()),
        );
    }

    fn upload(&self, tag: &str, source: &str, target: Option<&str>) -> Result<Upload> {
        hash_and_upload(
            self.artifacts.as_ref(),
            self.deploy.as_ref(),
            &self.deploy_config.public_domain,
            tag,
            source,
            target,
        )
    }

    /// Upload the archives and record links and checksums on `release`
    pub fn upload_archives(&self, tag: &str, version: &Version, release: &mut ReleaseEntry) -> Result<()> {
        let install = self.upload(tag, "install.zip", None)?;
        release.set("download_link_install", install.url);
        release.set("sha1_install", install.sha1);
        release.set("sha256_install", install.sha256);

        let update = self.upload(tag, "update.zip", None)?;
        release.set("download_link_update", update.url);
        release.set("sha1_update", update.sha1);
        release.set("sha256_update", update.sha256);

        self.upload(tag, "install.tar.xz", None)?;
        let next = format!(
            "{}/install_{}_next.tar.xz",
            UPLOAD_PREFIX,
            version.minor_branch()
        );
        self.upload(tag, "install.tar.xz", Some(&next))?;
        Ok(())
    }

    /// Insert release data and notes; publish only public releases
    pub fn register_update(&self, version: &Version, release: &ReleaseEntry) -> Result<()> {
        let mut base: UpdateParams = vec![
            ("--release-version".to_string(), release.version().to_string()),
            ("--channel".to_string(), version.update_channel().to_string()),
        ];
        if !release.version_text().is_empty() {
            base.push(("--version-text".to_string(), release.version_text().to_string()));
        }

        let mut insert = base.clone();
        let fields = [
            ("--min-version", self.minimum_version.clone()),
            ("--install-uri", release.get("download_link_install").to_string()),
            ("--install-size", self.artifacts.size("install.zip")?.to_string()),
            ("--install-sha1", release.get("sha1_install").to_string()),
            ("--install-sha256", release.get("sha256_install").to_string()),
            ("--update-uri", release.get("download_link_update").to_string()),
            ("--update-size", self.artifacts.size("update.zip")?.to_string()),
            ("--update-sha1", release.get("sha1_update").to_string()),
            ("--update-sha256", release.get("sha256_update").to_string()),
        ];
        insert.extend(fields.into_iter().map(|(key, value)| (key.to_string(), value)));

        self.update_api.insert_release_data(&insert)?;
        self.update_api.update_release_notes(&base)?;
        if release.is_public() {
            self.update_api.publish_release(&base)?;
        }
        Ok(())
    }

    fn sync_version_tracker(&self, version: &Version) {
        match &self.tracker {
            Some(tracker) => {
                let today = (self.clock)().date_naive();
                non_critical("version tracker sync", || {
                    sync_release(tracker.as_ref(), version, today)
                });
            }
            None => debug!("No version tracker configured"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::JsonChangelog;
    use crate::storage::LocalStorage;
    use crate::version_tracker::SoftwareVersion;
    use chrono::TimeZone;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUpdateApi {
        calls: Mutex<Vec<(String, UpdateParams)>>,
    }

    impl RecordingUpdateApi {
        fn operations(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(op, _)| op.clone()).collect()
        }

        fn params(&self, operation: &str) -> UpdateParams {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(op, _)| op == operation)
                .map(|(_, params)| params.clone())
                .unwrap()
        }
    }

    impl UpdateApi for RecordingUpdateApi {
        fn insert_release_data(&self, params: &UpdateParams) -> Result<()> {
            self.calls.lock().unwrap().push(("insert".to_string(), params.clone()));
            Ok(())
        }

        fn update_release_notes(&self, params: &UpdateParams) -> Result<()> {
            self.calls.lock().unwrap().push(("notes".to_string(), params.clone()));
            Ok(())
        }

        fn publish_release(&self, params: &UpdateParams) -> Result<()> {
            self.calls.lock().unwrap().push(("publish".to_string(), params.clone()));
            Ok(())
        }
    }

    struct UnavailableTracker;

    impl VersionTracker for UnavailableTracker {
        fn versions(&self) -> Result<Vec<SoftwareVersion>> {
            Err(ReleaseError::remote("store is down"))
        }

        fn upsert_version(&self, _: &str, _: Option<i64>, _: Option<&str>, _: Option<bool>) -> Result<()> {
            Err(ReleaseError::remote("store is down"))
        }
    }

    struct Fixture {
        artifacts: tempfile::TempDir,
        deploy_dir: tempfile::TempDir,
        api: Arc<RecordingUpdateApi>,
        preparer: ReleasePreparer,
    }

    fn fixture(list: &str) -> Fixture {
        let artifacts = tempfile::tempdir().unwrap();
        let deploy_dir = tempfile::tempdir().unwrap();
        for (name, content) in [
            ("install.zip", "install"),
            ("update.zip", "update!"),
            ("install.tar.xz", "tarball"),
        ] {
            fs::write(artifacts.path().join(name), content).unwrap();
        }
        fs::create_dir_all(deploy_dir.path().join("_meta")).unwrap();
        fs::write(deploy_dir.path().join("_meta/shopware6.xml"), list).unwrap();

        let api = Arc::new(RecordingUpdateApi::default());
        let config = Config::default();
        let preparer = ReleasePreparer::new(
            &config,
            Arc::new(LocalStorage::new(artifacts.path())),
            Arc::new(LocalStorage::new(deploy_dir.path())),
            api.clone(),
        )
        .with_clock(|| Utc.with_ymd_and_hms(2020, 9, 15, 10, 30, 0).unwrap());

        Fixture {
            artifacts,
            deploy_dir,
            api,
            preparer,
        }
    }

    fn stored_list(fixture: &Fixture) -> ReleaseList {
        ReleaseList::load(&fixture.deploy_dir.path().join("_meta/shopware6.xml")).unwrap()
    }

    const EMPTY: &str = "<?xml version=\"1.0\"?>\n<releases/>\n";

    #[test]
    fn test_prepare_release_creates_private_entry() {
        let fixture = fixture(EMPTY);
        let release = fixture.preparer.prepare_release("v6.3.1.0").unwrap();

        assert!(!release.is_public());
        assert_eq!(release.version(), "6.3.1.0");
        assert_eq!(release.get("type"), "Minor");
        assert_eq!(release.get("minimum_version"), "6.2.2");
        assert_eq!(
            release.get("github_repo"),
            "https://github.com/shopware/platform/tree/v6.3.1.0"
        );
        assert_eq!(
            release.get("upgrade_md"),
            "https://github.com/shopware/platform/blob/v6.3.1.0/UPGRADE-6.3.md"
        );
        let sha1 = release.get("sha1_install");
        assert_eq!(sha1.len(), 40);
        assert_eq!(
            release.get("download_link_install"),
            format!("https://releases.shopware.com/sw6/install_v6.3.1.0_{}.zip", sha1)
        );

        let deploy = fixture.deploy_dir.path();
        assert!(deploy.join("sw6/install_6.3.1_next.tar.xz").is_file());
        assert_eq!(stored_list(&fixture).releases().len(), 1);

        assert_eq!(fixture.api.operations(), vec!["insert", "notes"]);
        let insert = fixture.api.params("insert");
        assert!(insert.contains(&("--channel".to_string(), "100".to_string())));
        assert!(insert.contains(&("--install-size".to_string(), "7".to_string())));
        assert!(!insert.iter().any(|(key, _)| key == "--version-text"));
    }

    #[test]
    fn test_prepare_release_candidate_passes_version_text() {
        let fixture = fixture(EMPTY);
        fixture.preparer.prepare_release("v6.3.0.0-RC1").unwrap();
        let notes = fixture.api.params("notes");
        assert_eq!(
            notes,
            vec![
                ("--release-version".to_string(), "6.3.0.0".to_string()),
                ("--channel".to_string(), "80".to_string()),
                ("--version-text".to_string(), "RC1".to_string()),
            ]
        );
    }

    #[test]
    fn test_prepare_public_release_fails() {
        let list = "<?xml version=\"1.0\"?>\n<releases>\n  <release>\n    <version>6.3.0.0</version>\n    <rc>0</rc>\n    <public>1</public>\n  </release>\n</releases>\n";
        let fixture = fixture(list);
        let err = fixture.preparer.prepare_release("v6.3.0.0").unwrap_err();
        assert!(matches!(err, ReleaseError::AlreadyPublic(_)));
        assert!(err.is_precondition());
        assert!(fixture.api.operations().is_empty());
    }

    #[test]
    fn test_changelog_is_applied_unless_manual() {
        let fixture = fixture(EMPTY);
        let changelog = fixture.deploy_dir.path().join("changelog.json");
        fs::write(
            &changelog,
            r#"{"6.3.1.0": {"en": {"changelog": ["NEXT-1 - Fixed"]}}}"#,
        )
        .unwrap();
        let preparer = fixture.preparer;
        let preparer = preparer.with_changelog(Arc::new(JsonChangelog::new(&changelog)));

        let release = preparer.prepare_release("v6.3.1.0").unwrap();
        assert_eq!(
            release.locale("en").unwrap().changelog.as_deref(),
            Some("\nNEXT-1 - Fixed\n")
        );
    }

    #[test]
    fn test_manual_changelog_is_kept() {
        let list = "<?xml version=\"1.0\"?>\n<releases>\n  <release>\n    <version>6.3.1.0</version>\n    <rc>0</rc>\n    <manual>1</manual>\n  </release>\n</releases>\n";
        let fixture = fixture(list);
        let changelog = fixture.deploy_dir.path().join("changelog.json");
        fs::write(&changelog, r#"{"6.3.1.0": {"en": {"changelog": ["x"]}}}"#).unwrap();
        let preparer = fixture
            .preparer
            .with_changelog(Arc::new(JsonChangelog::new(&changelog)));

        let release = preparer.prepare_release("v6.3.1.0").unwrap();
        assert!(release.locales().is_empty());
    }

    #[test]
    fn test_version_tracker_failure_does_not_fail_release() {
        let fixture = fixture(EMPTY);
        let preparer = fixture
            .preparer
            .with_version_tracker(Arc::new(UnavailableTracker));
        assert!(preparer.prepare_release("v6.3.1.0").is_ok());
    }

    #[test]
    fn test_release_package_publishes() {
        let fixture = fixture(EMPTY);
        fixture.preparer.prepare_release("v6.3.1.0").unwrap();

        let release = fixture.preparer.release_package("v6.3.1.0").unwrap();
        assert!(release.is_public());
        assert_eq!(release.release_date(), "2020-09-15 10:30:00");
        assert_eq!(
            fixture.api.operations(),
            vec!["insert", "notes", "insert", "notes", "publish"]
        );
        assert!(stored_list(&fixture)
            .get_release("v6.3.1.0")
            .unwrap()
            .unwrap()
            .is_public());

        let err = fixture.preparer.release_package("v6.3.1.0").unwrap_err();
        assert!(matches!(err, ReleaseError::AlreadyPublic(_)));
    }

    #[test]
    fn test_release_package_requires_entry() {
        let fixture = fixture(EMPTY);
        let err = fixture.preparer.release_package("v6.3.1.0").unwrap_err();
        assert_eq!(err.to_string(), "Tag v6.3.1.0 not found");
    }

    #[test]
    fn test_missing_artifacts_fail_before_any_change() {
        let fixture = fixture(EMPTY);
        fs::remove_file(fixture.artifacts.path().join("update.zip")).unwrap();
        let err = fixture.preparer.prepare_release("v6.3.1.0").unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Missing release artifacts: update.zip");
        assert!(stored_list(&fixture).releases().is_empty());
    }

    #[test]
    fn test_missing_release_list_is_reported() {
        let fixture = fixture(EMPTY);
        fs::remove_file(fixture.deploy_dir.path().join("_meta/shopware6.xml")).unwrap();
        let err = fixture.preparer.prepare_release("v6.3.1.0").unwrap_err();
        assert!(matches!(err, ReleaseError::Manifest(_)));
    }
}
