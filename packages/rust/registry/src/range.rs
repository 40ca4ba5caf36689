//! Registry version-range expressions.
//!
//! Ranges use the compressed registry notation:
//! - `1.2`: every version whose prefix is `1.2` (`[1.2.0, 1.3.0)`)
//! - `0.7-1`: inclusive prefix bounds (`[0.7.0, 2.0.0)`)
//! - `1.2.0-*`: open upper bound
//! - `^1.2`: up to the next breaking release (`[1.2.0, 2.0.0)`, `^0.3` is
//!   `[0.3.0, 0.4.0)`)
//! - `*`: any version

use std::fmt;
use std::str::FromStr;

use docbuilder_shared::{DocBuilderError, Result, Version};

/// A version prefix of one to three components, or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Unbounded,
    Prefix { parts: [u64; 3], len: usize },
}

impl Bound {
    fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::Unbounded);
        }

        let mut parts = [0u64; 3];
        let mut len = 0;
        for piece in s.split('.') {
            if len == 3 {
                return Err(DocBuilderError::registry(format!(
                    "version bound {s:?} has more than three components"
                )));
            }
            parts[len] = piece.parse().map_err(|_| {
                DocBuilderError::registry(format!("invalid version bound {s:?}"))
            })?;
            len += 1;
        }
        Ok(Self::Prefix { parts, len })
    }

    /// The widest prefix a caret range on `self` may not leave: everything up
    /// to and including the first non-zero component.
    fn caret_upper(&self) -> Self {
        match *self {
            Self::Unbounded => Self::Unbounded,
            Self::Prefix { parts, len } => match parts[..len].iter().position(|&p| p != 0) {
                Some(i) => {
                    let mut kept = [0u64; 3];
                    kept[..=i].copy_from_slice(&parts[..=i]);
                    Self::Prefix { parts: kept, len: i + 1 }
                }
                None => *self,
            },
        }
    }

    /// Lowest version matching this prefix.
    fn floor(&self) -> Option<[u64; 3]> {
        match self {
            Self::Unbounded => None,
            Self::Prefix { parts, .. } => Some(*parts),
        }
    }

    /// First version past this prefix, e.g. `1.2` → `1.3.0`.
    fn ceiling(&self) -> Option<[u64; 3]> {
        match self {
            Self::Unbounded => None,
            Self::Prefix { parts, len } => {
                let mut next = *parts;
                let last = len.saturating_sub(1);
                next[last] = next[last].saturating_add(1);
                for slot in next.iter_mut().skip(last + 1) {
                    *slot = 0;
                }
                Some(next)
            }
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => f.write_str("*"),
            Self::Prefix { parts, len } => {
                let rendered: Vec<String> = parts[..*len].iter().map(u64::to_string).collect();
                f.write_str(&rendered.join("."))
            }
        }
    }
}

/// An inclusive range of versions between two prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    lower: Bound,
    upper: Bound,
}

impl VersionRange {
    /// The range matching every version.
    pub fn any() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Whether `version` falls inside this range. Prerelease tags are ignored.
    pub fn contains(&self, version: &Version) -> bool {
        let v = [version.major(), version.minor(), version.patch()];
        let above_floor = self.lower.floor().is_none_or(|floor| v >= floor);
        let below_ceiling = self.upper.ceiling().is_none_or(|ceiling| v < ceiling);
        above_floor && below_ceiling
    }
}

impl FromStr for VersionRange {
    type Err = DocBuilderError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('^') {
            let lower = Bound::parse(rest)?;
            if lower == Bound::Unbounded {
                return Err(DocBuilderError::registry(format!("invalid caret range {s:?}")));
            }
            return Ok(Self {
                lower,
                upper: lower.caret_upper(),
            });
        }

        let s = s.trim_start_matches('=');
        if s.is_empty() {
            return Err(DocBuilderError::registry("empty version range"));
        }

        match s.split_once('-') {
            Some((lo, hi)) => Ok(Self {
                lower: Bound::parse(lo)?,
                upper: Bound::parse(hi)?,
            }),
            None => {
                let bound = Bound::parse(s)?;
                Ok(Self {
                    lower: bound,
                    upper: bound,
                })
            }
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lower == self.upper {
            write!(f, "{}", self.lower)
        } else {
            write!(f, "{}-{}", self.lower, self.upper)
        }
    }
}

/// A union of ranges, as written in a compat entry (`"0.7, 1"` or an array).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpec(Vec<VersionRange>);

impl VersionSpec {
    pub fn contains(&self, version: &Version) -> bool {
        self.0.iter().any(|r| r.contains(version))
    }

    /// Parse a TOML compat value: a string (comma-separated ranges) or an
    /// array of such strings.
    pub fn from_toml(value: &toml::Value) -> Result<Self> {
        let mut ranges = Vec::new();
        match value {
            toml::Value::String(s) => {
                for piece in s.split(',') {
                    ranges.push(piece.parse()?);
                }
            }
            toml::Value::Array(items) => {
                for item in items {
                    let s = item.as_str().ok_or_else(|| {
                        DocBuilderError::registry(format!("compat entry {item} is not a string"))
                    })?;
                    for piece in s.split(',') {
                        ranges.push(piece.parse()?);
                    }
                }
            }
            other => {
                return Err(DocBuilderError::registry(format!(
                    "unsupported compat value {other}"
                )));
            }
        }
        Ok(Self(ranges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().expect("version")
    }

    fn range(s: &str) -> VersionRange {
        s.parse().expect("range")
    }

    #[test]
    fn single_prefix_covers_its_minor_series() {
        let r = range("1.2");
        assert!(r.contains(&v("1.2.0")));
        assert!(r.contains(&v("1.2.9")));
        assert!(!r.contains(&v("1.3.0")));
        assert!(!r.contains(&v("1.1.9")));
    }

    #[test]
    fn hyphen_range_is_inclusive_of_upper_prefix() {
        let r = range("0.7-1");
        assert!(r.contains(&v("0.7.0")));
        assert!(r.contains(&v("1.10.4")));
        assert!(!r.contains(&v("2.0.0")));
        assert!(!r.contains(&v("0.6.9")));
    }

    #[test]
    fn open_upper_bound() {
        let r = range("1.6.0-*");
        assert!(r.contains(&v("1.6.0")));
        assert!(r.contains(&v("42.0.0")));
        assert!(!r.contains(&v("1.5.4")));
        assert!(VersionRange::any().contains(&v("0.0.1")));
    }

    #[test]
    fn caret_allows_up_to_next_breaking_release() {
        let r = range("^1.3");
        assert!(r.contains(&v("1.3.0")));
        assert!(r.contains(&v("1.9.2")));
        assert!(!r.contains(&v("1.2.9")));
        assert!(!r.contains(&v("2.0.0")));
        assert_eq!(r, range("1.3-1"));

        let r = range("^0.3.1");
        assert!(r.contains(&v("0.3.7")));
        assert!(!r.contains(&v("0.3.0")));
        assert!(!r.contains(&v("0.4.0")));

        let r = range("^0.0.3");
        assert!(r.contains(&v("0.0.3")));
        assert!(!r.contains(&v("0.0.4")));

        assert!("^*".parse::<VersionRange>().is_err());
        assert_eq!(range("0.5.3-0").to_string(), "0.5.3-0");
    }

    #[test]
    fn spec_from_toml_array_and_string() {
        let value = toml::Value::Array(vec!["0.6".into(), "1".into()]);
        let spec = VersionSpec::from_toml(&value).expect("spec");
        assert!(spec.contains(&v("0.6.4")));
        assert!(spec.contains(&v("1.9.0")));
        assert!(!spec.contains(&v("0.7.0")));

        let spec = VersionSpec::from_toml(&toml::Value::String("0.7, 1".into())).expect("spec");
        assert!(spec.contains(&v("0.7.1")));
    }

    #[test]
    fn malformed_range_is_rejected() {
        assert!("1.x".parse::<VersionRange>().is_err());
        assert!("".parse::<VersionRange>().is_err());
        assert!(VersionSpec::from_toml(&toml::Value::Integer(3)).is_err());
    }
}
