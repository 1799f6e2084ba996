//! Software version registry of the plugin store
//!
//! Every release gets a version record hanging below its closest existing
//! parent (`6.3.1`, then `6.3`, then `6`). Synchronising is best effort;
//! the release flow never fails because the store is unavailable.

use crate::config::VersionTrackerConfig;
use crate::domain::Version;
use crate::error::{ReleaseError, Result};
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const USER_AGENT: &str = concat!("release-tools/", env!("CARGO_PKG_VERSION"));
const TOKEN_HEADER: &str = "X-Shopware-Token";
const VERSIONS_PATH: &str = "/pluginstatics/softwareVersions";

/// Release date as sent by the store: a plain string or `{ "date": ... }`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ReleaseDate {
    Text(String),
    Object { date: String },
}

impl ReleaseDate {
    pub fn as_str(&self) -> &str {
        match self {
            ReleaseDate::Text(date) => date,
            ReleaseDate::Object { date } => date,
        }
    }

    /// Calendar day of the date, ignoring any time part
    pub fn day(&self) -> Option<NaiveDate> {
        let text = self.as_str().trim();
        NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d").ok()
    }
}

/// One record of the registry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SoftwareVersion {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub public: Value,
    #[serde(default, rename = "releaseDate")]
    pub release_date: Option<ReleaseDate>,
    #[serde(default, deserialize_with = "parent_id")]
    pub parent: Option<i64>,
}

/// Parents arrive as numbers, numeric strings or null
fn parent_id<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn normalize_name(name: &str) -> &str {
    name.trim_start_matches(['v', ' '])
}

/// External registry of released software versions
pub trait VersionTracker: Send + Sync {
    fn versions(&self) -> Result<Vec<SoftwareVersion>>;

    /// Create the record `name` or update it in place
    ///
    /// Without `parent_id` the current record's parent is kept; without
    /// `public` the current visibility is kept.
    fn upsert_version(
        &self,
        name: &str,
        parent_id: Option<i64>,
        release_date: Option<&str>,
        public: Option<bool>,
    ) -> Result<()>;

    /// Record named `name`; a leading `v` is ignored
    fn version_by_name(&self, name: &str) -> Result<Option<SoftwareVersion>> {
        let name = normalize_name(name);
        Ok(self.versions()?.into_iter().find(|v| v.name == name))
    }
}

/// [VersionTracker] backed by the store's HTTP API
#[derive(Debug, Clone)]
pub struct SbpClient {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl SbpClient {
    /// Log in and keep the session token for later calls
    pub fn login(base_url: &str, user: &str, password: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();

        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
        }

        let response: TokenResponse = client
            .post(format!("{}/ldaptokens", base_url))
            .json(&json!({ "name": user, "password": password }))
            .send()?
            .error_for_status()?
            .json()?;

        debug!("Logged in to {}", base_url);
        Ok(SbpClient {
            base_url,
            token: response.token,
            client,
        })
    }

    pub fn from_config(config: &VersionTrackerConfig) -> Result<Self> {
        let missing = |field: &str| ReleaseError::config(format!("version_tracker.{} is required", field));
        let base_uri = config.base_uri.as_deref().ok_or_else(|| missing("base_uri"))?;
        let user = config.user.as_deref().ok_or_else(|| missing("user"))?;
        let password = config.password.as_deref().ok_or_else(|| missing("password"))?;
        Self::login(base_uri, user, password)
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, VERSIONS_PATH)
    }
}

impl VersionTracker for SbpClient {
    fn versions(&self) -> Result<Vec<SoftwareVersion>> {
        Ok(self
            .client
            .get(self.url())
            .header(TOKEN_HEADER, &self.token)
            .send()?
            .error_for_status()?
            .json()?)
    }

    fn upsert_version(
        &self,
        name: &str,
        parent_id: Option<i64>,
        release_date: Option<&str>,
        public: Option<bool>,
    ) -> Result<()> {
        let name = normalize_name(name);
        let versions = self.versions()?;
        let current = versions.iter().find(|v| v.name == name);

        let parent = parent_id
            .or_else(|| current.and_then(|c| c.parent))
            .and_then(|id| versions.iter().find(|v| v.id == id))
            .ok_or_else(|| ReleaseError::remote("No parent found"))?;

        let request = match current {
            None => self.client.post(self.url()).json(&json!({
                "edit": null,
                "id": null,
                "name": name,
                "parent": parent.id,
                "public": public,
                "releaseDate": release_date,
            })),
            Some(current) => {
                let public = public.map(Value::Bool).unwrap_or_else(|| current.public.clone());
                self.client.put(self.url()).json(&json!({
                    "edit": true,
                    "id": current.id,
                    "name": name,
                    "parent": parent.id,
                    "public": public,
                    "releaseDate": release_date,
                }))
            }
        };

        request
            .header(TOKEN_HEADER, &self.token)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

/// First Monday of the month after `today`
pub fn first_monday_of_next_month(today: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let offset = (7 - first.weekday().num_days_from_monday()) % 7;
    Some(first + ChronoDuration::days(i64::from(offset)))
}

/// Register `version` below its closest existing parent
///
/// An existing release date is kept; otherwise the first Monday of next
/// month is used as a placeholder.
pub fn sync_release(tracker: &dyn VersionTracker, version: &Version, today: NaiveDate) -> Result<()> {
    let name = version.four_part();
    let candidates = [
        format!("{}.{}.{}", version.major, version.minor, version.patch),
        format!("{}.{}", version.major, version.minor),
        version.major.to_string(),
    ];

    let mut parent = None;
    for candidate in &candidates {
        if let Some(found) = tracker.version_by_name(candidate)? {
            info!("Found parent {} for {}", found.name, name);
            parent = Some(found);
            break;
        }
    }
    let parent = parent.ok_or_else(|| {
        ReleaseError::remote(format!("Failed to sync version {}: parent not found", name))
    })?;

    let release_date = tracker
        .version_by_name(&name)?
        .and_then(|current| current.release_date.as_ref().and_then(ReleaseDate::day))
        .or_else(|| first_monday_of_next_month(today))
        .ok_or_else(|| ReleaseError::remote(format!("No release date for {}", name)))?;
    let release_date = release_date.format("%Y-%m-%d").to_string();

    info!("Upserting version {} with release date {}", name, release_date);
    tracker.upsert_version(&name, Some(parent.id), Some(&release_date), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tiny_http::{Header, Response, Server, StatusCode};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_first_monday_of_next_month() {
        assert_eq!(first_monday_of_next_month(date(2020, 9, 15)), Some(date(2020, 10, 5)));
        assert_eq!(first_monday_of_next_month(date(2020, 12, 31)), Some(date(2021, 1, 4)));
        // 2021-03-01 is itself a Monday
        assert_eq!(first_monday_of_next_month(date(2021, 2, 10)), Some(date(2021, 3, 1)));
    }

    #[test]
    fn test_software_version_decoding() {
        let versions: Vec<SoftwareVersion> = serde_json::from_value(json!([
            {"id": 1, "name": "6", "public": true, "releaseDate": null, "parent": null},
            {"id": 2, "name": "6.3", "public": true, "releaseDate": "2020-07-01", "parent": "1"},
            {"id": 3, "name": "6.3.1.0", "public": false,
             "releaseDate": {"date": "2020-10-05 00:00:00.000000", "timezone": "UTC"}, "parent": 2}
        ]))
        .unwrap();

        assert_eq!(versions[0].parent, None);
        assert_eq!(versions[1].parent, Some(1));
        assert_eq!(versions[2].parent, Some(2));
        assert_eq!(
            versions[2].release_date.as_ref().and_then(ReleaseDate::day),
            Some(date(2020, 10, 5))
        );
    }

    struct FakeTracker {
        versions: Vec<SoftwareVersion>,
        upserts: Mutex<Vec<(String, Option<i64>, Option<String>)>>,
    }

    impl FakeTracker {
        fn new(versions: Value) -> Self {
            FakeTracker {
                versions: serde_json::from_value(versions).unwrap(),
                upserts: Mutex::new(Vec::new()),
            }
        }
    }

    impl VersionTracker for FakeTracker {
        fn versions(&self) -> Result<Vec<SoftwareVersion>> {
            Ok(self.versions.clone())
        }

        fn upsert_version(
            &self,
            name: &str,
            parent_id: Option<i64>,
            release_date: Option<&str>,
            _public: Option<bool>,
        ) -> Result<()> {
            self.upserts.lock().unwrap().push((
                name.to_string(),
                parent_id,
                release_date.map(str::to_string),
            ));
            Ok(())
        }
    }

    #[test]
    fn test_sync_release_uses_most_specific_parent() {
        let tracker = FakeTracker::new(json!([
            {"id": 1, "name": "6"},
            {"id": 2, "name": "6.3"},
            {"id": 3, "name": "6.3.1"}
        ]));
        let version = Version::parse_tag("v6.3.1.1").unwrap();
        sync_release(&tracker, &version, date(2020, 9, 15)).unwrap();

        assert_eq!(
            tracker.upserts.lock().unwrap().clone(),
            vec![("6.3.1.1".to_string(), Some(3), Some("2020-10-05".to_string()))]
        );
    }

    #[test]
    fn test_sync_release_keeps_existing_date() {
        let tracker = FakeTracker::new(json!([
            {"id": 1, "name": "6"},
            {"id": 7, "name": "6.4.0.0", "releaseDate": {"date": "2021-05-04 00:00:00.000000"}, "parent": 1}
        ]));
        let version = Version::parse_tag("v6.4.0.0").unwrap();
        sync_release(&tracker, &version, date(2021, 4, 1)).unwrap();

        assert_eq!(
            tracker.upserts.lock().unwrap()[0],
            ("6.4.0.0".to_string(), Some(1), Some("2021-05-04".to_string()))
        );
    }

    #[test]
    fn test_sync_release_without_parent_fails() {
        let tracker = FakeTracker::new(json!([{"id": 1, "name": "5"}]));
        let version = Version::parse_tag("v6.3.0.0").unwrap();
        let err = sync_release(&tracker, &version, date(2020, 9, 1)).unwrap_err();
        assert!(err.to_string().contains("parent not found"));
    }

    type Seen = Arc<Mutex<Vec<(String, String, Option<String>, String)>>>;

    /// Serves `responses` in order and records method, path, token and body
    fn spawn_server(responses: Vec<(u16, String)>) -> (String, Seen, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").expect("server");
        let base_url = format!("http://{}", server.server_addr());
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let seen_thread = Arc::clone(&seen);

        let handle = thread::spawn(move || {
            for (status, body) in responses {
                let mut req = server.recv().expect("request");
                let token = req
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv(TOKEN_HEADER))
                    .map(|h| h.value.as_str().to_string());
                let mut request_body = String::new();
                let _ = req.as_reader().read_to_string(&mut request_body);
                seen_thread.lock().expect("lock").push((
                    req.method().to_string(),
                    req.url().to_string(),
                    token,
                    request_body,
                ));

                let resp = Response::from_string(body)
                    .with_status_code(StatusCode(status))
                    .with_header(
                        Header::from_bytes("Content-Type", "application/json").expect("header"),
                    );
                req.respond(resp).expect("respond");
            }
        });

        (base_url, seen, handle)
    }

    #[test]
    fn test_sbp_client_updates_existing_record() {
        let listing = json!([
            {"id": 2, "name": "6.3", "public": true, "parent": null},
            {"id": 9, "name": "6.3.0.0", "public": true, "parent": "2", "releaseDate": null}
        ])
        .to_string();
        let (base_url, seen, handle) = spawn_server(vec![
            (200, json!({"token": "secret"}).to_string()),
            (200, listing),
            (200, "{}".to_string()),
        ]);

        let client = SbpClient::login(&base_url, "bot", "pw").unwrap();
        client
            .upsert_version("v6.3.0.0", None, Some("2020-10-05"), None)
            .unwrap();
        handle.join().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "POST");
        assert_eq!(seen[0].1, "/ldaptokens");
        assert_eq!(
            serde_json::from_str::<Value>(&seen[0].3).unwrap(),
            json!({"name": "bot", "password": "pw"})
        );
        assert_eq!(seen[1].0, "GET");
        assert_eq!(seen[1].2.as_deref(), Some("secret"));
        assert_eq!(seen[2].0, "PUT");
        assert_eq!(
            serde_json::from_str::<Value>(&seen[2].3).unwrap(),
            json!({
                "edit": true,
                "id": 9,
                "name": "6.3.0.0",
                "parent": 2,
                "public": true,
                "releaseDate": "2020-10-05"
            })
        );
    }

    #[test]
    fn test_sbp_client_requires_parent() {
        let (base_url, _seen, handle) = spawn_server(vec![
            (200, json!({"token": "secret"}).to_string()),
            (200, "[]".to_string()),
        ]);
        let client = SbpClient::login(&base_url, "bot", "pw").unwrap();
        let err = client
            .upsert_version("6.5.0.0", None, None, None)
            .unwrap_err();
        handle.join().unwrap();
        assert!(err.to_string().contains("No parent found"));
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let err = SbpClient::from_config(&VersionTrackerConfig::default()).unwrap_err();
        assert!(matches!(err, ReleaseError::Config(_)));
    }
}
