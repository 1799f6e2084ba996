//! Next-tag computation
//!
//! Given the tags that already exist, a range constraint and a stability
//! policy, the resolver decides which tag to cut next.

use crate::domain::{Constraint, Op, Stability, StabilityPolicy, Version, EPOCH};
use crate::error::{ReleaseError, Result};
use crate::warning::ReleaseWarning;
use tracing::debug;

/// Computes the next tag for a release series
#[derive(Debug, Clone)]
pub struct TagResolver {
    policy: StabilityPolicy,
}

impl TagResolver {
    pub fn new(policy: StabilityPolicy) -> Self {
        TagResolver { policy }
    }

    /// Build a resolver from a minimum stability such as `"rc"`
    pub fn from_stability(minimum: &str) -> Result<Self> {
        Ok(Self::new(StabilityPolicy::parse(minimum)?))
    }

    pub fn policy(&self) -> &StabilityPolicy {
        &self.policy
    }

    /// Tags satisfying `constraint` whose stability the policy accepts,
    /// sorted ascending. Tags that are not release versions are skipped.
    pub fn matching_versions<S: AsRef<str>>(&self, tags: &[S], constraint: &Constraint) -> Vec<String> {
        let mut matching: Vec<(Version, String)> = tags
            .iter()
            .filter_map(|tag| {
                let tag = tag.as_ref();
                match Version::parse_tag(tag) {
                    Ok(version) => Some((version, tag.to_string())),
                    Err(e) => {
                        ReleaseWarning::UnparsableTag {
                            tag: tag.to_string(),
                            reason: e.to_string(),
                        }
                        .emit();
                        None
                    }
                }
            })
            .filter(|(version, _)| constraint.matches(version))
            .filter(|(version, _)| self.policy.accepts(version.stability))
            .collect();

        matching.sort();
        matching.into_iter().map(|(_, tag)| tag).collect()
    }

    /// Most recent tag in the series, if any
    pub fn latest_matching<S: AsRef<str>>(
        &self,
        tags: &[S],
        constraint: &Constraint,
    ) -> Result<Option<Version>> {
        self.matching_versions(tags, constraint)
            .last()
            .map(|tag| Version::parse_tag(tag))
            .transpose()
    }

    /// Next tag after `last`
    ///
    /// Without a previous version, or when its stability is no longer
    /// allowed, the series restarts at the constraint's initial tag.
    pub fn next_tag(
        &self,
        constraint: &Constraint,
        last: Option<&Version>,
        is_minor_release: bool,
    ) -> Result<Version> {
        let last = match last {
            Some(v) if self.policy.accepts(v.stability) => v,
            Some(v) => {
                debug!(
                    "Stability {} of {} not allowed by minimum {}, restarting series",
                    v.stability,
                    v,
                    self.policy.minimum()
                );
                return self.initial_tag(constraint);
            }
            None => return self.initial_tag(constraint),
        };

        let increment = |n: u32| n.checked_add(1).ok_or_else(|| ReleaseError::InvalidTag(last.to_string()));

        if last.stability.is_stable() {
            let next = if !last.is_new_scheme() || is_minor_release {
                Version::new(last.major, last.minor, increment(last.patch)?, 0)
            } else {
                Version::new(last.major, last.minor, last.patch, increment(last.build)?)
            };
            return Ok(next);
        }

        let counter = increment(last.pre_release.unwrap_or(0))?;
        Ok(last.with_stability(last.stability, Some(counter)))
    }

    /// Compute the next tag from the raw tag list of a repository
    pub fn resolve_next_tag<S: AsRef<str>>(
        &self,
        tags: &[S],
        constraint: &Constraint,
        is_minor_release: bool,
    ) -> Result<Version> {
        let last = self.latest_matching(tags, constraint)?;
        self.next_tag(constraint, last.as_ref(), is_minor_release)
    }

    fn initial_tag(&self, constraint: &Constraint) -> Result<Version> {
        let bound = constraint
            .lower_bound()
            .filter(|b| b.op == Op::Ge)
            .ok_or_else(|| {
                ReleaseError::InvalidConstraint(format!(
                    "constraint should be a range like >=6.1.0 <6.2.0, got '{}'",
                    constraint.as_str()
                ))
            })?;

        let lower = bound.version;
        if lower.major != EPOCH {
            return Err(ReleaseError::InvalidTag(bound.to_string()));
        }

        let base = if lower.is_new_scheme() {
            Version::new(lower.major, lower.minor, lower.patch, 0)
        } else {
            Version::new(lower.major, lower.minor, 0, 0)
        };

        let minimum = self.policy.minimum();
        if minimum == Stability::Stable {
            Ok(base)
        } else {
            Ok(base.with_stability(minimum, Some(1)))
        }
    }
}
