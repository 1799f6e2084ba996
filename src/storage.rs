//! Artifact and deploy areas
//!
//! Build outputs are read from one storage, hashed, and uploaded under a
//! content-addressed name to the public deploy storage.

use crate::error::{ReleaseError, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::info;

/// Directory prefix of every uploaded release archive
pub const UPLOAD_PREFIX: &str = "sw6";

/// Byte storage addressed by relative paths
pub trait ArtifactStorage: Send + Sync {
    fn read(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Create or replace `path` with the content of `source`
    fn put(&self, path: &str, source: &mut dyn Read) -> Result<()>;

    fn size(&self, path: &str) -> Result<u64>;

    fn exists(&self, path: &str) -> bool;
}

/// [ArtifactStorage] rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path, refusing anything that leaves the root
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(ReleaseError::config(format!(
                "Storage path '{}' must be relative to {}",
                path,
                self.root.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl ArtifactStorage for LocalStorage {
    fn read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = File::open(self.resolve(path)?).map_err(|e| {
            ReleaseError::Io(io::Error::new(
                e.kind(),
                format!("Could not read from path \"{}\": {}", path, e),
            ))
        })?;
        Ok(Box::new(file))
    }

    fn put(&self, path: &str, source: &mut dyn Read) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&target)?;
        io::copy(source, &mut file)?;
        Ok(())
    }

    fn size(&self, path: &str) -> Result<u64> {
        Ok(fs::metadata(self.resolve(path)?)?.len())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// Hex SHA-1 and SHA-256 of a stream, computed in one pass
pub fn hash_stream(source: &mut dyn Read) -> Result<(String, String)> {
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let read = source.read(&mut buf)?;
        if read == 0 {
            break;
        }
        sha1.update(&buf[..read]);
        sha256.update(&buf[..read]);
    }

    Ok((hex::encode(sha1.finalize()), hex::encode(sha256.finalize())))
}

/// Where an artifact ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub path: String,
    pub url: String,
    pub sha1: String,
    pub sha256: String,
}

/// `sw6/{base}_{tag}_{sha1}.{ext}`; the extension starts at the first dot
pub fn versioned_path(source: &str, tag: &str, sha1: &str) -> String {
    let basename = Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source.to_string());
    match basename.split_once('.') {
        Some((base, ext)) => format!("{}/{}_{}_{}.{}", UPLOAD_PREFIX, base, tag, sha1, ext),
        None => format!("{}/{}_{}_{}", UPLOAD_PREFIX, basename, tag, sha1),
    }
}

/// Hash `source` in the artifact area and copy it to the deploy area
///
/// The target defaults to [versioned_path].
pub fn hash_and_upload(
    artifacts: &dyn ArtifactStorage,
    deploy: &dyn ArtifactStorage,
    public_domain: &str,
    tag: &str,
    source: &str,
    target: Option<&str>,
) -> Result<Upload> {
    let (sha1, sha256) = hash_stream(&mut artifacts.read(source)?)?;
    let path = target
        .map(str::to_string)
        .unwrap_or_else(|| versioned_path(source, tag, &sha1));

    info!("Uploading {} to {}", source, path);
    info!("sha1: {}", sha1);
    info!("sha256: {}", sha256);

    deploy.put(&path, &mut artifacts.read(source)?)?;

    Ok(Upload {
        url: format!("{}/{}", public_domain.trim_end_matches('/'), path),
        path,
        sha1,
        sha256,
    })
}
