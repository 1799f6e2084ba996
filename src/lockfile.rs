//! Dependency manifest (`composer.json`) and lock file (`composer.lock`)
//!
//! Only the fields the release flow touches are modelled; everything else
//! in the documents is carried through untouched.

use crate::domain::Stability;
use crate::error::{ReleaseError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const MANIFEST_FILE: &str = "composer.json";
pub const LOCK_FILE: &str = "composer.lock";

/// Resolved packages of a lock file
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ComposerLock {
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
    #[serde(default, rename = "packages-dev")]
    pub packages_dev: Vec<PackageEntry>,
}

/// One resolved package
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PackageEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub source: Option<PackageSource>,
    #[serde(default)]
    pub dist: Option<PackageDist>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PackageSource {
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PackageDist {
    #[serde(rename = "type")]
    pub dist_type: String,
    #[serde(default)]
    pub reference: Option<String>,
}

impl PackageEntry {
    /// Commit the package resolved to, source reference first
    pub fn reference(&self) -> Option<&str> {
        self.source
            .as_ref()
            .and_then(|s| s.reference.as_deref())
            .or_else(|| self.dist.as_ref().and_then(|d| d.reference.as_deref()))
    }

    pub fn dist_type(&self) -> Option<&str> {
        self.dist.as_ref().map(|d| d.dist_type.as_str())
    }
}

impl ComposerLock {
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Runtime package named `name`
    pub fn find_package(&self, name: &str) -> Option<&PackageEntry> {
        self.packages.iter().find(|p| p.name == name)
    }
}

/// Whether a lock entry is the release of `tag`
///
/// `Ok(false)` means the lock has not picked up the tag yet and a later
/// regeneration may. A `path` dist, or the right version at a commit other
/// than `expected_commit`, cannot be fixed by regenerating and is an error.
pub fn validate_package(entry: &PackageEntry, tag: &str, expected_commit: Option<&str>) -> Result<bool> {
    if entry.dist_type() == Some("path") {
        return Err(ReleaseError::consistency(format!(
            "{} is installed from a path repository, which cannot be released",
            entry.name
        )));
    }

    if entry.version.trim_start_matches('v') != tag.trim_start_matches('v') {
        debug!(
            "{} resolved to {}, waiting for {}",
            entry.name, entry.version, tag
        );
        return Ok(false);
    }

    if let Some(expected) = expected_commit {
        let actual = entry.reference().unwrap_or_default();
        if actual != expected {
            return Err(ReleaseError::consistency(format!(
                "{} {} points at {} but the repository is at {}",
                entry.name,
                entry.version,
                if actual.is_empty() { "no commit" } else { actual },
                expected
            )));
        }
    }

    Ok(true)
}

/// Parsed `composer.json`, key order preserved
#[derive(Debug, Clone, PartialEq)]
pub struct ComposerManifest {
    document: Value,
}

impl ComposerManifest {
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(ComposerManifest {
            document: serde_json::from_str(&content)?,
        })
    }

    pub fn from_value(document: Value) -> Self {
        ComposerManifest { document }
    }

    /// Version constraint the manifest requires for `package`
    pub fn required_constraint(&self, package: &str) -> Option<&str> {
        self.document.get("require")?.get(package)?.as_str()
    }

    pub fn minimum_stability(&self) -> Option<&str> {
        self.document.get("minimum-stability")?.as_str()
    }

    /// Set `minimum-stability`; returns whether the normalized value changed
    pub fn set_minimum_stability(&mut self, stability: Stability) -> Result<bool> {
        let current = self
            .minimum_stability()
            .and_then(|s| s.parse::<Stability>().ok());
        if current == Some(stability) {
            return Ok(false);
        }

        let object = self
            .document
            .as_object_mut()
            .ok_or_else(|| ReleaseError::config("composer.json is not a JSON object"))?;
        object.insert(
            "minimum-stability".to_string(),
            Value::String(stability.as_str().to_string()),
        );
        Ok(true)
    }

    /// Pretty JSON with four-space indentation and unescaped slashes
    pub fn to_pretty_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.document.serialize(&mut serializer)?;
        String::from_utf8(buf).map_err(|e| ReleaseError::config(e.to_string()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_pretty_string()?)?;
        Ok(())
    }
}

/// Write `stability` into the manifest at `path`, only touching the file
/// when the normalized value differs
pub fn update_stability(path: &Path, stability: Stability) -> Result<bool> {
    let mut manifest = ComposerManifest::read(path)?;
    let changed = manifest.set_minimum_stability(stability)?;
    if changed {
        manifest.write(path)?;
        info!("Set minimum-stability of {} to {}", path.display(), stability.as_str());
    }
    Ok(changed)
}
