use crate::error::{ReleaseError, Result};
use crate::release_list::{parse_version, LocaleText};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-locale changelog lines of a release
pub type Changelog = BTreeMap<String, LocaleText>;

/// Where release changelogs come from
pub trait ChangelogSource: Send + Sync {
    fn changelog(&self, tag: &str) -> Result<Changelog>;
}

/// A single line or a list of lines
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Lines {
    One(String),
    Many(Vec<String>),
}

impl Lines {
    fn into_vec(self) -> Vec<String> {
        match self {
            Lines::One(line) => vec![line],
            Lines::Many(lines) => lines,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LocaleEntry {
    #[serde(default)]
    changelog: Option<Lines>,
    #[serde(default)]
    important_changes: Option<Lines>,
}

/// Changelogs kept in a JSON file keyed by release version
///
/// ```json
/// { "v6.3.1.0": { "en": { "changelog": ["NEXT-1 - Fixed"] } } }
/// ```
///
/// Keys match like release list entries, so `6.3.1.0` and `v6.3.1.0`
/// are the same release.
#[derive(Debug, Clone)]
pub struct JsonChangelog {
    path: PathBuf,
}

impl JsonChangelog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonChangelog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChangelogSource for JsonChangelog {
    fn changelog(&self, tag: &str) -> Result<Changelog> {
        let content = fs::read_to_string(&self.path)?;
        let releases: BTreeMap<String, BTreeMap<String, LocaleEntry>> = serde_json::from_str(&content)?;
        let wanted = parse_version(tag)?;

        let locales = releases
            .into_iter()
            .find(|(key, _)| parse_version(key).map(|k| k == wanted).unwrap_or(false))
            .map(|(_, locales)| locales)
            .ok_or_else(|| ReleaseError::manifest(format!("Version \"{}\" not found", tag)))?;

        Ok(locales
            .into_iter()
            .map(|(lang, entry)| {
                let text = LocaleText {
                    changelog: entry.changelog.map(Lines::into_vec).unwrap_or_default(),
                    important_changes: entry.important_changes.map(Lines::into_vec),
                };
                (lang, text)
            })
            .collect())
    }
}
