//! Stability ladder and the policy that filters tags by it
//!
//! The ladder is fixed: `stable > RC > beta > alpha > dev`. A policy is
//! built from a minimum stability and accepts every rung from `stable`
//! down to and including that minimum.

use crate::error::{ReleaseError, Result};
use std::fmt;
use std::str::FromStr;

/// Release maturity of a version
///
/// Ordering follows precedence: `Dev < Alpha < Beta < ReleaseCandidate < Stable`,
/// so a stable release sorts after every pre-release of the same numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stability {
    Dev,
    Alpha,
    Beta,
    ReleaseCandidate,
    Stable,
}

impl Stability {
    /// The ladder from most to least stable
    pub const LADDER: [Stability; 5] = [
        Stability::Stable,
        Stability::ReleaseCandidate,
        Stability::Beta,
        Stability::Alpha,
        Stability::Dev,
    ];

    /// Numeric priority used by the update feed, higher is more stable
    pub fn update_channel(self) -> u32 {
        match self {
            Stability::Stable => 100,
            Stability::ReleaseCandidate => 80,
            Stability::Beta => 60,
            Stability::Alpha => 40,
            Stability::Dev => 20,
        }
    }

    pub fn is_stable(self) -> bool {
        self == Stability::Stable
    }

    /// Canonical spelling, as rendered in tags and manifests
    pub fn as_str(self) -> &'static str {
        match self {
            Stability::Stable => "stable",
            Stability::ReleaseCandidate => "RC",
            Stability::Beta => "beta",
            Stability::Alpha => "alpha",
            Stability::Dev => "dev",
        }
    }
}

impl FromStr for Stability {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stable" => Ok(Stability::Stable),
            "rc" => Ok(Stability::ReleaseCandidate),
            "beta" | "b" => Ok(Stability::Beta),
            "alpha" | "a" => Ok(Stability::Alpha),
            "dev" => Ok(Stability::Dev),
            _ => Err(ReleaseError::InvalidStability(s.to_string())),
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum-stability policy shared by the resolver and the tagger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityPolicy {
    minimum: Stability,
    allowed: Vec<Stability>,
}

impl StabilityPolicy {
    /// Build a policy from a minimum stability; `dev` is rejected.
    pub fn new(minimum: Stability) -> Result<Self> {
        if minimum == Stability::Dev {
            return Err(ReleaseError::InvalidStability(
                "minimal stability dev is not supported. Use at least alpha".to_string(),
            ));
        }

        let allowed = Stability::LADDER
            .iter()
            .copied()
            .take_while(|s| *s >= minimum)
            .collect();

        Ok(StabilityPolicy { minimum, allowed })
    }

    /// Parse the minimum from configuration text such as `"rc"` or `"stable"`
    pub fn parse(minimum: &str) -> Result<Self> {
        Self::new(minimum.parse()?)
    }

    pub fn minimum(&self) -> Stability {
        self.minimum
    }

    /// Contiguous prefix of the ladder ending at the minimum
    pub fn allowed(&self) -> &[Stability] {
        &self.allowed
    }

    pub fn accepts(&self, stability: Stability) -> bool {
        self.allowed.contains(&stability)
    }
}
