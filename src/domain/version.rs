use crate::domain::stability::Stability;
use crate::error::{ReleaseError, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// The only major version tags are cut for
pub const EPOCH: u32 = 6;

/// From this minor on, tags carry a fourth (build) component
pub const NEW_SCHEME_MINOR: u32 = 3;

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)(?:\.(\d+))?(?:-((?i:rc|beta|alpha|dev))(\d+)?)?$")
            .expect("tag pattern is valid")
    })
}

/// A release version such as `v6.2.1`, `v6.3.0.2` or `v6.4.0.0-RC1`
///
/// Legacy versions (minor below 3) have three components and keep `build`
/// at 0; newer versions have four. The scheme is derived from `minor` and
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
    pub stability: Stability,
    /// Pre-release counter; `None` when the tag carries no number
    pub pre_release: Option<u32>,
}

/// Release type recorded in the release manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseType {
    Major,
    Minor,
    Patch,
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseType::Major => write!(f, "Major"),
            ReleaseType::Minor => write!(f, "Minor"),
            ReleaseType::Patch => write!(f, "Patch"),
        }
    }
}

impl Version {
    /// Create a stable version
    pub fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Version {
            major,
            minor,
            patch,
            build,
            stability: Stability::Stable,
            pre_release: None,
        }
    }

    /// Same numbers with a pre-release suffix
    pub fn with_stability(self, stability: Stability, pre_release: Option<u32>) -> Self {
        Version {
            stability,
            pre_release: if stability.is_stable() {
                None
            } else {
                pre_release
            },
            ..self
        }
    }

    /// Parse a release tag
    ///
    /// Accepts an optional `v`, three or four numeric components and an
    /// optional `-<stability><n>` suffix. Anything outside the current
    /// epoch is rejected, as are legacy tags with a fourth component.
    pub fn parse_tag(tag: &str) -> Result<Self> {
        let invalid = || ReleaseError::InvalidTag(tag.to_string());

        let caps = tag_pattern().captures(tag.trim()).ok_or_else(invalid)?;

        let number = |idx: usize| -> Result<u32> {
            match caps.get(idx) {
                Some(m) => m.as_str().parse::<u32>().map_err(|_| invalid()),
                None => Ok(0),
            }
        };

        let major = number(1)?;
        if major != EPOCH {
            return Err(invalid());
        }
        let minor = number(2)?;
        // legacy tags have no build component
        if minor < NEW_SCHEME_MINOR && caps.get(4).is_some() {
            return Err(invalid());
        }

        let stability = match caps.get(5) {
            Some(m) => m.as_str().parse::<Stability>()?,
            None => Stability::Stable,
        };
        let pre_release = match caps.get(6) {
            Some(m) => Some(m.as_str().parse::<u32>().map_err(|_| invalid())?),
            None => None,
        };

        Ok(Version {
            major,
            minor,
            patch: number(3)?,
            build: number(4)?,
            stability,
            pre_release: if stability.is_stable() {
                None
            } else {
                pre_release
            },
        })
    }

    /// Four-component numbering applies from minor 3 on
    pub fn is_new_scheme(&self) -> bool {
        self.minor >= NEW_SCHEME_MINOR
    }

    pub fn release_type(&self) -> ReleaseType {
        if self.patch == 0 && self.build == 0 {
            ReleaseType::Major
        } else if self.build == 0 {
            ReleaseType::Minor
        } else {
            ReleaseType::Patch
        }
    }

    pub fn update_channel(&self) -> u32 {
        self.stability.update_channel()
    }

    /// Branch a tag is released from: `6.3.0` for new tags, `6.2` for legacy ones
    pub fn minor_branch(&self) -> String {
        if self.is_new_scheme() {
            format!("{}.{}.{}", self.major, self.minor, self.patch)
        } else {
            self.major_branch()
        }
    }

    pub fn major_branch(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// Stable build releases of the four-component scheme; legacy tags never qualify.
    pub fn is_security_update(&self) -> bool {
        self.is_new_scheme() && self.build > 0 && self.stability.is_stable()
    }

    /// `major.minor.patch.build` regardless of scheme
    pub fn four_part(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.build
        )
    }

    fn sort_key(&self) -> (u32, u32, u32, u32, Stability, u32) {
        (
            self.major,
            self.minor,
            self.patch,
            self.build,
            self.stability,
            self.pre_release.unwrap_or(0),
        )
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then_with(|| self.pre_release.cmp(&other.pre_release))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse_tag(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.is_new_scheme() {
            write!(f, ".{}", self.build)?;
        }
        if !self.stability.is_stable() {
            write!(f, "-{}", self.stability)?;
            if let Some(n) = self.pre_release {
                write!(f, "{}", n)?;
            }
        }
        Ok(())
    }
}
