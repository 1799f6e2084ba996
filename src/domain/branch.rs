use crate::domain::stability::Stability;
use crate::domain::version::{Version, NEW_SCHEME_MINOR};

/// Branch names a tag may be released from, most specific first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCandidates {
    pub names: Vec<String>,
}

impl BranchCandidates {
    /// `M.m.p.b`, `M.m.p`, `M.m`, then the development branch for tags
    /// at or above the first four-component release
    pub fn for_version(version: &Version, development_branch: &str) -> Self {
        let mut names = vec![
            version.four_part(),
            format!("{}.{}.{}", version.major, version.minor, version.patch),
            version.major_branch(),
        ];

        let threshold = Version::new(version.major, NEW_SCHEME_MINOR, 0, 0)
            .with_stability(Stability::Dev, None);
        if *version >= threshold {
            names.push(development_branch.to_string());
        }

        BranchCandidates { names }
    }

    /// First candidate present in `existing`
    pub fn first_existing<'a>(&'a self, existing: &[String]) -> Option<&'a str> {
        self.names
            .iter()
            .find(|name| existing.iter().any(|e| e == *name))
            .map(|s| s.as_str())
    }
}
