use crate::manifest::ManifestError;
use semver::{Version, VersionReq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A semantic version range as written in manifests and on the command line.
///
/// Ranges follow registry conventions rather than Cargo's: a bare version is
/// an exact match, comparators may be separated by whitespace or commas and
/// are intersected, `a - b` is an inclusive span, and `||` unions
/// alternatives. `*`, `x`, `latest` and the empty string accept anything.
/// Matching and the canonical form are delegated to [`semver::VersionReq`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    pub fn parse(input: &str) -> Result<Self, ManifestError> {
        let mut alternatives = Vec::new();
        for alternative in input.trim().split("||") {
            let req = parse_alternative(alternative).map_err(|e| ManifestError::InvalidRange {
                range: input.to_owned(),
                reason: e,
            })?;
            alternatives.push(req);
        }
        Ok(Self { alternatives })
    }

    /// A range accepting exactly one version.
    pub fn exact(version: &Version) -> Self {
        let req = VersionReq {
            comparators: vec![semver::Comparator {
                op: semver::Op::Exact,
                major: version.major,
                minor: Some(version.minor),
                patch: Some(version.patch),
                pre: version.pre.clone(),
            }],
        };
        Self {
            alternatives: vec![req],
        }
    }

    /// A caret range anchored at the given version (`^1.2.3`).
    pub fn caret(version: &Version) -> Self {
        let req = VersionReq {
            comparators: vec![semver::Comparator {
                op: semver::Op::Caret,
                major: version.major,
                minor: Some(version.minor),
                patch: Some(version.patch),
                pre: version.pre.clone(),
            }],
        };
        Self {
            alternatives: vec![req],
        }
    }

    pub fn any() -> Self {
        Self {
            alternatives: vec![VersionReq::STAR],
        }
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Highest version among `candidates` that satisfies the range.
    pub fn max_satisfying<'a, I>(&self, candidates: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        let mut satisfying: Vec<&Version> =
            candidates.into_iter().filter(|v| self.matches(v)).collect();
        satisfying.sort_by(|a, b| b.cmp(a));
        satisfying.first().copied()
    }
}

fn parse_alternative(alternative: &str) -> Result<VersionReq, String> {
    let tokens: Vec<&str> = alternative
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty()
        || tokens
            .iter()
            .all(|t| matches!(*t, "*" | "x" | "X" | "latest"))
    {
        return Ok(VersionReq::STAR);
    }

    if let [low, "-", high] = tokens.as_slice() {
        return VersionReq::parse(&format!(">={}, <={}", strip_v(low), strip_v(high)))
            .map_err(|e| e.to_string());
    }

    let mut comparators = Vec::with_capacity(tokens.len());
    let mut pending_op: Option<&str> = None;
    for token in tokens {
        if token
            .chars()
            .all(|c| matches!(c, '<' | '>' | '=' | '^' | '~'))
        {
            pending_op = Some(token);
            continue;
        }
        let comparator = match pending_op.take() {
            Some(op) => format!("{op}{}", strip_v(token)),
            None => {
                let bare = strip_v(token);
                let is_bare_version = bare.starts_with(|c: char| c.is_ascii_digit())
                    && !bare.contains(['*', 'x', 'X']);
                if is_bare_version {
                    format!("={bare}")
                } else {
                    token.to_owned()
                }
            }
        };
        comparators.push(comparator);
    }
    if let Some(op) = pending_op {
        return Err(format!("operator '{op}' is missing a version"));
    }
    VersionReq::parse(&comparators.join(", ")).map_err(|e| e.to_string())
}

fn strip_v(token: &str) -> &str {
    token
        .strip_prefix('v')
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(token)
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.alternatives.iter().enumerate() {
            if i > 0 {
                f.write_str(" || ")?;
            }
            write!(f, "{req}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionRange {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Clean a version string (`v1.2.3`, ` =1.2.3 `) into a strict semantic version.
pub fn clean_version(input: &str) -> Option<Version> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('=').unwrap_or(trimmed).trim_start();
    let trimmed = strip_v(trimmed);
    Version::parse(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn bare_version_is_exact() {
        let range = VersionRange::parse("1.2.0").unwrap();
        assert!(range.matches(&v("1.2.0")));
        assert!(!range.matches(&v("1.2.1")));
    }

    #[test]
    fn caret_range() {
        let range = VersionRange::parse("^1.0.0").unwrap();
        assert!(range.matches(&v("1.0.0")));
        assert!(range.matches(&v("1.9.3")));
        assert!(!range.matches(&v("2.0.0")));
    }

    #[test]
    fn whitespace_comparators_are_intersected() {
        let range = VersionRange::parse(">=1.1.0 <2.0.0").unwrap();
        assert!(!range.matches(&v("1.0.9")));
        assert!(range.matches(&v("1.1.0")));
        assert!(!range.matches(&v("2.0.0")));
    }

    #[test]
    fn detached_operator_is_joined() {
        let range = VersionRange::parse(">= 1.1.0").unwrap();
        assert!(range.matches(&v("3.0.0")));
        assert!(!range.matches(&v("1.0.0")));
    }

    #[test]
    fn union_of_alternatives() {
        let range = VersionRange::parse("^1.0.0 || ^3.0.0").unwrap();
        assert!(range.matches(&v("1.4.0")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(range.matches(&v("3.1.0")));
    }

    #[test]
    fn hyphen_span_is_inclusive() {
        let range = VersionRange::parse("1.0.0 - 2.0.0").unwrap();
        assert!(range.matches(&v("2.0.0")));
        assert!(!range.matches(&v("2.0.1")));
    }

    #[test]
    fn star_and_latest_match_anything() {
        for input in ["*", "latest", "", "x"] {
            let range = VersionRange::parse(input).unwrap();
            assert!(range.matches(&v("0.0.1")), "{input}");
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(VersionRange::parse("not a range").is_err());
        assert!(VersionRange::parse(">=").is_err());
    }

    #[test]
    fn display_is_canonical_and_stable() {
        for input in ["1.2.3", "^1.0", ">=1.0.0 <2.0.0", "^1.0.0 || ~3.1", "1.x", "*"] {
            let once = VersionRange::parse(input).unwrap().to_string();
            let twice = VersionRange::parse(&once).unwrap().to_string();
            assert_eq!(once, twice, "{input}");
        }
    }

    #[test]
    fn max_satisfying_picks_highest() {
        let versions = [v("1.0.0"), v("1.2.0"), v("2.0.0")];
        let range = VersionRange::parse("^1.0.0").unwrap();
        assert_eq!(range.max_satisfying(&versions), Some(&v("1.2.0")));
        let range = VersionRange::parse("^3.0.0").unwrap();
        assert_eq!(range.max_satisfying(&versions), None);
    }

    #[test]
    fn clean_version_strips_prefixes() {
        assert_eq!(clean_version(" v1.2.3 "), Some(v("1.2.3")));
        assert_eq!(clean_version("=1.0.0"), Some(v("1.0.0")));
        assert_eq!(clean_version("1.0"), None);
    }
}
