//! Version range constraints in the package manager's notation
//!
//! Supported forms: exact versions, comparison operators (`>=`, `>`, `<`,
//! `<=`, `!=`, `=`, `==`), wildcards (`6.2.*`, `6.2.x`, `*`), tilde
//! (`~6.2.0`), caret (`^6.2.0`) and hyphen ranges (`6.2 - 6.3`). Bounds
//! are joined by whitespace, commas or `&&` (all must hold) and
//! alternatives by `||` or `|` (one must hold).
//!
//! Lower bounds without an explicit stability are extended with `-dev`,
//! so `~6.1.0` starts at `6.1.0.0-dev` and admits pre-releases of 6.1.0.

use crate::domain::stability::Stability;
use crate::domain::version::Version;
use crate::error::{ReleaseError, Result};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn partial_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^[vV]?(\d+)(?:\.(\d+|[xX*]))?(?:\.(\d+|[xX*]))?(?:\.(\d+|[xX*]))?(?:-?((?i:rc|beta|b|alpha|a|dev|stable))\.?(\d+)?)?$",
        )
        .expect("constraint pattern is valid")
    })
}

/// Comparison operator of a single bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// One comparison, e.g. `>= 6.2.0.0-dev`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub op: Op,
    pub version: Version,
}

impl Bound {
    fn new(op: Op, version: Version) -> Self {
        Bound { op, version }
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self.op {
            Op::Eq => version == &self.version,
            Op::Ne => version != &self.version,
            Op::Lt => version < &self.version,
            Op::Le => version <= &self.version,
            Op::Gt => version > &self.version,
            Op::Ge => version >= &self.version,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.version;
        write!(f, "{} {}.{}.{}.{}", self.op, v.major, v.minor, v.patch, v.build)?;
        if !v.stability.is_stable() {
            write!(f, "-{}", v.stability)?;
            if let Some(n) = v.pre_release {
                write!(f, "{}", n)?;
            }
        }
        Ok(())
    }
}

/// A parsed constraint: a disjunction of conjunctions of bounds
///
/// An alternative with no bounds matches every version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    source: String,
    alternatives: Vec<Vec<Bound>>,
}

/// Version text as written in a constraint, possibly incomplete
#[derive(Debug, Clone)]
struct PartialVersion {
    parts: Vec<u32>,
    wildcard: bool,
    stability: Option<(Stability, Option<u32>)>,
}

impl PartialVersion {
    fn parse(text: &str, constraint: &str) -> Result<Self> {
        let invalid = || ReleaseError::InvalidConstraint(constraint.to_string());
        let caps = partial_pattern().captures(text.trim()).ok_or_else(invalid)?;

        let mut parts = Vec::new();
        let mut wildcard = false;
        for idx in 1..=4 {
            let Some(m) = caps.get(idx) else { break };
            let raw = m.as_str();
            if matches!(raw, "x" | "X" | "*") {
                wildcard = true;
            } else if wildcard {
                return Err(invalid());
            } else {
                parts.push(raw.parse::<u32>().map_err(|_| invalid())?);
            }
        }

        let stability = match caps.get(5) {
            Some(m) => {
                let stability = m.as_str().parse::<Stability>()?;
                let number = match caps.get(6) {
                    Some(n) => Some(n.as_str().parse::<u32>().map_err(|_| invalid())?),
                    None => None,
                };
                Some((stability, number))
            }
            None => None,
        };
        if wildcard && stability.is_some() {
            return Err(invalid());
        }

        Ok(PartialVersion {
            parts,
            wildcard,
            stability,
        })
    }

    /// Like `parse`, but wildcards are not allowed
    fn parse_exact(text: &str, constraint: &str) -> Result<Self> {
        let v = Self::parse(text, constraint)?;
        if v.wildcard {
            return Err(ReleaseError::InvalidConstraint(constraint.to_string()));
        }
        Ok(v)
    }

    fn part(&self, idx: usize) -> u32 {
        self.parts.get(idx).copied().unwrap_or(0)
    }

    /// Missing components filled with zero, explicit stability kept
    fn normalized(&self) -> Version {
        let version = Version::new(self.part(0), self.part(1), self.part(2), self.part(3));
        match self.stability {
            Some((stability, number)) => version.with_stability(stability, number),
            None => version,
        }
    }

    /// Lower bound form: `-dev` appended unless a stability was given
    fn lower(&self) -> Version {
        match self.stability {
            Some(_) => self.normalized(),
            None => self.normalized().with_stability(Stability::Dev, None),
        }
    }

    /// Increment the component at `idx`, zero everything after it, `-dev`
    fn bumped(&self, idx: usize, constraint: &str) -> Result<Version> {
        let mut parts = [self.part(0), self.part(1), self.part(2), self.part(3)];
        parts[idx] = parts[idx]
            .checked_add(1)
            .ok_or_else(|| ReleaseError::InvalidConstraint(constraint.to_string()))?;
        for part in parts.iter_mut().skip(idx + 1) {
            *part = 0;
        }
        Ok(Version::new(parts[0], parts[1], parts[2], parts[3]).with_stability(Stability::Dev, None))
    }
}

impl Constraint {
    /// Parse constraint text such as `">=6.2.0 <6.3.0"` or `"~6.3.0"`
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ReleaseError::InvalidConstraint(text.to_string()));
        }

        let alternatives = trimmed
            .replace("||", "|")
            .split('|')
            .map(|alt| Self::parse_conjunction(alt, text))
            .collect::<Result<Vec<_>>>()?;

        Ok(Constraint {
            source: trimmed.to_string(),
            alternatives,
        })
    }

    fn parse_conjunction(text: &str, constraint: &str) -> Result<Vec<Bound>> {
        let invalid = || ReleaseError::InvalidConstraint(constraint.to_string());

        let raw: Vec<&str> = text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty() && *t != "&&")
            .collect();
        if raw.is_empty() {
            return Err(invalid());
        }

        // glue operators written apart from their version and hyphen ranges
        let mut atoms: Vec<String> = Vec::new();
        let mut i = 0;
        while i < raw.len() {
            let token = raw[i];
            if is_bare_operator(token) {
                let next = raw.get(i + 1).ok_or_else(invalid)?;
                atoms.push(format!("{}{}", token, next));
                i += 2;
            } else if raw.get(i + 1) == Some(&"-") {
                let upper = raw.get(i + 2).ok_or_else(invalid)?;
                atoms.push(format!("{} - {}", token, upper));
                i += 3;
            } else {
                atoms.push(token.to_string());
                i += 1;
            }
        }

        let mut bounds = Vec::new();
        for atom in atoms {
            bounds.extend(Self::parse_atom(&atom, constraint)?);
        }
        Ok(bounds)
    }

    fn parse_atom(atom: &str, constraint: &str) -> Result<Vec<Bound>> {
        if matches!(atom, "*" | "x" | "X") {
            return Ok(Vec::new());
        }

        if let Some((from, to)) = atom.split_once(" - ") {
            let from = PartialVersion::parse_exact(from, constraint)?;
            let to = PartialVersion::parse_exact(to, constraint)?;
            let upper = if to.parts.len() >= 3 || to.stability.is_some() {
                Bound::new(Op::Le, to.normalized())
            } else {
                Bound::new(Op::Lt, to.bumped(to.parts.len().saturating_sub(1), constraint)?)
            };
            return Ok(vec![Bound::new(Op::Ge, from.lower()), upper]);
        }

        if let Some(rest) = atom.strip_prefix('~') {
            let v = PartialVersion::parse_exact(rest, constraint)?;
            let idx = v.parts.len().saturating_sub(2);
            return Ok(vec![Bound::new(Op::Ge, v.lower()), Bound::new(Op::Lt, v.bumped(idx, constraint)?)]);
        }

        if let Some(rest) = atom.strip_prefix('^') {
            let v = PartialVersion::parse_exact(rest, constraint)?;
            let idx = if v.part(0) != 0 || v.parts.len() < 2 {
                0
            } else if v.part(1) != 0 || v.parts.len() < 3 {
                1
            } else {
                2
            };
            return Ok(vec![Bound::new(Op::Ge, v.lower()), Bound::new(Op::Lt, v.bumped(idx, constraint)?)]);
        }

        let (op, rest) = split_operator(atom);
        let v = PartialVersion::parse(rest, constraint)?;

        if v.wildcard {
            if op.is_some() || v.parts.is_empty() {
                return Err(ReleaseError::InvalidConstraint(constraint.to_string()));
            }
            let idx = v.parts.len() - 1;
            return Ok(vec![Bound::new(Op::Ge, v.lower()), Bound::new(Op::Lt, v.bumped(idx, constraint)?)]);
        }

        let bound = match op {
            None | Some(Op::Eq) => Bound::new(Op::Eq, v.normalized()),
            Some(Op::Ge) => Bound::new(Op::Ge, v.lower()),
            Some(Op::Lt) => Bound::new(Op::Lt, v.lower()),
            Some(op) => Bound::new(op, v.normalized()),
        };
        Ok(vec![bound])
    }

    /// True if any alternative is satisfied by `version`
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|bounds| bounds.iter().all(|b| b.matches(version)))
    }

    /// The first bound of a single multi-bound range, the only shape an
    /// initial tag can be derived from
    pub fn lower_bound(&self) -> Option<&Bound> {
        match self.alternatives.as_slice() {
            [bounds] if bounds.len() > 1 => bounds.first(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn is_bare_operator(token: &str) -> bool {
    matches!(token, ">=" | "<=" | ">" | "<" | "!=" | "<>" | "=" | "==")
}

fn split_operator(atom: &str) -> (Option<Op>, &str) {
    const OPERATORS: [(&str, Op); 8] = [
        (">=", Op::Ge),
        ("<=", Op::Le),
        ("!=", Op::Ne),
        ("<>", Op::Ne),
        ("==", Op::Eq),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
    ];
    for (prefix, op) in OPERATORS {
        if let Some(rest) = atom.strip_prefix(prefix) {
            return (Some(op), rest);
        }
    }
    (None, atom)
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .alternatives
            .iter()
            .map(|bounds| {
                if bounds.is_empty() {
                    "*".to_string()
                } else {
                    bounds
                        .iter()
                        .map(|b| b.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                }
            })
            .collect();
        write!(f, "{}", rendered.join(" || "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(text: &str) -> String {
        Constraint::parse(text).unwrap().to_string()
    }

    fn satisfies(constraint: &str, tag: &str) -> bool {
        Constraint::parse(constraint)
            .unwrap()
            .matches(&Version::parse_tag(tag).unwrap())
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(rendered("6.2.*"), ">= 6.2.0.0-dev < 6.3.0.0-dev");
        assert_eq!(rendered("6.2.x"), ">= 6.2.0.0-dev < 6.3.0.0-dev");
        assert_eq!(rendered("6.3.0.*"), ">= 6.3.0.0-dev < 6.3.1.0-dev");
        assert_eq!(rendered("6.*"), ">= 6.0.0.0-dev < 7.0.0.0-dev");
        assert_eq!(rendered("*"), "*");
    }

    #[test]
    fn test_tilde() {
        assert_eq!(rendered("~6.2.0"), ">= 6.2.0.0-dev < 6.3.0.0-dev");
        assert_eq!(rendered("~6.2"), ">= 6.2.0.0-dev < 7.0.0.0-dev");
        assert_eq!(rendered("~6.3.0.0"), ">= 6.3.0.0-dev < 6.3.1.0-dev");
    }

    #[test]
    fn test_caret() {
        assert_eq!(rendered("^6.2.0"), ">= 6.2.0.0-dev < 7.0.0.0-dev");
        assert_eq!(rendered("^0.3.1"), ">= 0.3.1.0-dev < 0.4.0.0-dev");
    }

    #[test]
    fn test_operators() {
        assert_eq!(rendered(">=6.2.0 <6.3.0"), ">= 6.2.0.0-dev < 6.3.0.0-dev");
        assert_eq!(rendered(">= 6.3.0.0, < 6.4"), ">= 6.3.0.0-dev < 6.4.0.0-dev");
        assert_eq!(rendered(">6.2.0 <=6.2.5"), "> 6.2.0.0 <= 6.2.5.0");
        assert_eq!(rendered(">=6.2.0-RC1"), ">= 6.2.0.0-RC1");
        assert_eq!(rendered("6.2.1"), "== 6.2.1.0");
        assert_eq!(rendered("!=6.2.1"), "!= 6.2.1.0");
    }

    #[test]
    fn test_hyphen_range() {
        assert_eq!(rendered("6.2.0 - 6.2.4"), ">= 6.2.0.0-dev <= 6.2.4.0");
        assert_eq!(rendered("6.2 - 6.3"), ">= 6.2.0.0-dev < 6.4.0.0-dev");
    }

    #[test]
    fn test_alternatives() {
        let c = Constraint::parse("6.1.* || 6.3.0.*").unwrap();
        assert!(c.matches(&Version::parse_tag("v6.1.4").unwrap()));
        assert!(c.matches(&Version::parse_tag("v6.3.0.2").unwrap()));
        assert!(!c.matches(&Version::parse_tag("v6.2.0").unwrap()));
    }

    #[test]
    fn test_prereleases_of_lower_bound_match() {
        assert!(satisfies("~6.1.0", "v6.1.0-rc"));
        assert!(satisfies("~6.1.0", "v6.1.0-alpha2"));
        assert!(satisfies("~6.1.0", "v6.1.1"));
        assert!(!satisfies("~6.1.0", "v6.2.0-rc1"));
        assert!(!satisfies("6.1.*", "v6.2.0"));
    }

    #[test]
    fn test_lower_bound_requires_range() {
        assert!(Constraint::parse("<6.3").unwrap().lower_bound().is_none());
        assert!(Constraint::parse("6.2.1").unwrap().lower_bound().is_none());
        let c = Constraint::parse("~6.2.0").unwrap();
        let lower = c.lower_bound().unwrap();
        assert_eq!(lower.op, Op::Ge);
        assert_eq!(lower.version.minor, 2);
    }

    #[test]
    fn test_invalid_constraints() {
        for text in ["", "foo", "dev-trunk", ">=", "6.x.1", "~"] {
            assert!(Constraint::parse(text).is_err(), "{}", text);
        }
    }

    #[test]
    fn test_upper_bound_overflow_is_rejected() {
        let err = Constraint::parse("~6.4294967295.0").unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidConstraint(_)));
        assert!(Constraint::parse("6.4294967295.*").is_err());
        assert!(Constraint::parse("^6.0.0").is_ok());
    }
}
