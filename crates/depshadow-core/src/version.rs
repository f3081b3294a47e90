//! NuGet package versions and version ranges.
//!
//! Versions carry up to four numeric parts plus SemVer 2 release labels; the
//! labels and build metadata are validated with the `semver` crate. Ranges
//! follow NuGet's interval notation (`[1.0, 2.0)`), the bare minimum form
//! (`1.0` means `>= 1.0`) and floating patterns (`1.*`, `1.0.0-*`).

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use semver::{BuildMetadata, Prerelease};

use crate::error::{Error, Result};

/// A NuGet version such as `1.2.3`, `4.0.0.1` or `2.0.0-beta.1+sha.5114f85`.
#[derive(Clone, Debug)]
pub struct NuGetVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: u64,
    pre: Prerelease,
    /// Lower-cased release labels; NuGet compares labels case-insensitively.
    pre_key: Prerelease,
    build: BuildMetadata,
}

impl NuGetVersion {
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidVersion {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty version"));
        }
        let (rest, build) = match trimmed.split_once('+') {
            Some((rest, build)) => (rest, build),
            None => (trimmed, ""),
        };
        let (numbers, pre) = match rest.split_once('-') {
            Some((numbers, pre)) => (numbers, pre),
            None => (rest, ""),
        };

        let mut parts = [0u64; 4];
        let mut count = 0;
        for part in numbers.split('.') {
            if count == 4 {
                return Err(invalid("more than four numeric parts"));
            }
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("numeric part expected"));
            }
            parts[count] = part.parse().map_err(|_| invalid("numeric part out of range"))?;
            count += 1;
        }

        let pre_parsed = Prerelease::new(pre).map_err(|e| invalid(&e.to_string()))?;
        let pre_key =
            Prerelease::new(&pre.to_ascii_lowercase()).map_err(|e| invalid(&e.to_string()))?;
        let build = BuildMetadata::new(build).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            revision: parts[3],
            pre: pre_parsed,
            pre_key,
            build,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// Build metadata as written; ignored by comparisons and normalization.
    pub fn metadata(&self) -> &str {
        self.build.as_str()
    }

    fn numbers(&self) -> (u64, u64, u64, u64) {
        (self.major, self.minor, self.patch, self.revision)
    }
}

impl fmt::Display for NuGetVersion {
    /// Normalized form: `major.minor.patch[.revision][-labels]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.revision > 0 {
            write!(f, ".{}", self.revision)?;
        }
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        Ok(())
    }
}

impl FromStr for NuGetVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialEq for NuGetVersion {
    fn eq(&self, other: &Self) -> bool {
        self.numbers() == other.numbers() && self.pre_key == other.pre_key
    }
}

impl Eq for NuGetVersion {}

impl Hash for NuGetVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.numbers().hash(state);
        self.pre_key.as_str().hash(state);
    }
}

impl Ord for NuGetVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numbers()
            .cmp(&other.numbers())
            .then_with(|| self.pre_key.cmp(&other.pre_key))
    }
}

impl PartialOrd for NuGetVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A NuGet version range.
#[derive(Clone, Debug)]
pub struct VersionRange {
    min: Option<NuGetVersion>,
    min_inclusive: bool,
    max: Option<NuGetVersion>,
    max_inclusive: bool,
    /// Floating pattern as written (`1.*`), kept for formatting and equality.
    float: Option<String>,
}

impl VersionRange {
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersionRange {
            value: value.to_string(),
        };

        let s = value.trim();
        if s.is_empty() {
            return Err(invalid());
        }

        if s.starts_with('[') || s.starts_with('(') {
            return Self::parse_interval(s).ok_or_else(invalid);
        }

        if s.contains('*') {
            return Self::parse_floating(s).ok_or_else(invalid);
        }

        let min = NuGetVersion::parse(s).map_err(|_| invalid())?;
        Ok(Self {
            min: Some(min),
            min_inclusive: true,
            max: None,
            max_inclusive: false,
            float: None,
        })
    }

    fn parse_interval(s: &str) -> Option<Self> {
        let min_inclusive = s.starts_with('[');
        let max_inclusive = match s.chars().last()? {
            ']' => true,
            ')' => false,
            _ => return None,
        };
        if s.len() < 2 {
            return None;
        }
        let inner = s[1..s.len() - 1].trim();

        let Some((low, high)) = inner.split_once(',') else {
            // `[1.0]` is the only single-version interval NuGet accepts.
            if !(min_inclusive && max_inclusive) || inner.is_empty() {
                return None;
            }
            let exact = NuGetVersion::parse(inner).ok()?;
            return Some(Self {
                min: Some(exact.clone()),
                min_inclusive: true,
                max: Some(exact),
                max_inclusive: true,
                float: None,
            });
        };
        if high.contains(',') {
            return None;
        }

        let parse_bound = |text: &str| -> Option<Option<NuGetVersion>> {
            let text = text.trim();
            if text.is_empty() {
                Some(None)
            } else {
                NuGetVersion::parse(text).ok().map(Some)
            }
        };
        let min = parse_bound(low)?;
        let max = parse_bound(high)?;

        if let (Some(lo), Some(hi)) = (&min, &max) {
            match lo.cmp(hi) {
                Ordering::Greater => return None,
                Ordering::Equal if !(min_inclusive && max_inclusive) => return None,
                _ => {}
            }
        }

        Some(Self {
            min,
            min_inclusive,
            max,
            max_inclusive,
            float: None,
        })
    }

    fn parse_floating(s: &str) -> Option<Self> {
        let (numbers, pre) = match s.split_once('-') {
            Some((numbers, pre)) => (numbers, Some(pre)),
            None => (s, None),
        };

        // Only a trailing wildcard segment is meaningful: `1.*`, `1.2.*`, `*`.
        let numbers = if numbers == "*" {
            "0".to_string()
        } else if let Some(prefix) = numbers.strip_suffix(".*") {
            if prefix.contains('*') {
                return None;
            }
            format!("{}.0", prefix)
        } else if numbers.contains('*') {
            return None;
        } else {
            numbers.to_string()
        };

        let floor = match pre {
            Some(label) => {
                let label = label.strip_suffix('*').unwrap_or(label);
                if label.contains('*') {
                    return None;
                }
                let label = label.trim_end_matches('.');
                let label = if label.is_empty() { "0" } else { label };
                format!("{}-{}", numbers, label)
            }
            None => numbers,
        };

        let min = NuGetVersion::parse(&floor).ok()?;
        Some(Self {
            min: Some(min),
            min_inclusive: true,
            max: None,
            max_inclusive: false,
            float: Some(s.to_string()),
        })
    }

    /// The concrete minimum when the range includes it.
    pub fn inclusive_min(&self) -> Option<&NuGetVersion> {
        match &self.min {
            Some(min) if self.min_inclusive => Some(min),
            _ => None,
        }
    }

    pub fn has_lower_bound(&self) -> bool {
        self.min.is_some()
    }

    pub fn is_floating(&self) -> bool {
        self.float.is_some()
    }

    /// NuGet's short form: `1.0.0`, `[1.0.0]`, `[1.0.0, 2.0.0)`, `1.*`.
    pub fn to_short_string(&self) -> String {
        if let Some(pattern) = &self.float {
            return pattern.clone();
        }
        match (&self.min, &self.max) {
            (Some(min), Some(max)) if min == max && self.min_inclusive && self.max_inclusive => {
                format!("[{}]", min)
            }
            (Some(min), None) if self.min_inclusive => min.to_string(),
            (min, max) => format!(
                "{}{}, {}{}",
                if self.min_inclusive { '[' } else { '(' },
                min.as_ref().map(|v| v.to_string()).unwrap_or_default(),
                max.as_ref().map(|v| v.to_string()).unwrap_or_default(),
                if self.max_inclusive { ']' } else { ')' },
            ),
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_short_string())
    }
}

impl FromStr for VersionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialEq for VersionRange {
    /// Range equality: same bounds, same inclusivity where a bound exists,
    /// same floating pattern.
    fn eq(&self, other: &Self) -> bool {
        let float_eq = match (&self.float, &other.float) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        let min_eq = match (&self.min, &other.min) {
            (Some(a), Some(b)) => a == b && self.min_inclusive == other.min_inclusive,
            (None, None) => true,
            _ => false,
        };
        let max_eq = match (&self.max, &other.max) {
            (Some(a), Some(b)) => a == b && self.max_inclusive == other.max_inclusive,
            (None, None) => true,
            _ => false,
        };
        float_eq && min_eq && max_eq
    }
}

impl Eq for VersionRange {}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> NuGetVersion {
        NuGetVersion::parse(s).unwrap()
    }

    fn r(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn normalizes_versions() {
        assert_eq!(v("1").to_string(), "1.0.0");
        assert_eq!(v("1.2").to_string(), "1.2.0");
        assert_eq!(v("1.2.3.0").to_string(), "1.2.3");
        assert_eq!(v("1.2.3.4").to_string(), "1.2.3.4");
        assert_eq!(v("2.0.0-Beta.1+abc").to_string(), "2.0.0-Beta.1");
        assert_eq!(v("2.0.0-Beta.1+abc").metadata(), "abc");
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!(NuGetVersion::parse("").is_err());
        assert!(NuGetVersion::parse("1.x").is_err());
        assert!(NuGetVersion::parse("1.2.3.4.5").is_err());
        assert!(NuGetVersion::parse("$(FooVersion)").is_err());
        assert!(NuGetVersion::parse("1..2").is_err());
    }

    #[test]
    fn compares_versions() {
        assert_eq!(v("1.0"), v("1.0.0.0"));
        assert_eq!(v("1.0.0-BETA"), v("1.0.0-beta"));
        assert_eq!(v("1.0.0+a"), v("1.0.0+b"));
        assert!(v("1.0.0-beta") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
        assert!(v("1.0.0-beta.2") < v("1.0.0-beta.11"));
        assert!(v("1.0.0.1") > v("1.0.0"));
        assert!(!v("1.0.0").is_prerelease());
        assert!(v("1.0.0-rc").is_prerelease());
    }

    #[test]
    fn parses_minimum_ranges() {
        let range = r("1.2");
        assert_eq!(range.inclusive_min(), Some(&v("1.2.0")));
        assert_eq!(range.to_short_string(), "1.2.0");
        assert!(range.has_lower_bound());
    }

    #[test]
    fn parses_intervals() {
        let exact = r("[1.0]");
        assert_eq!(exact.to_short_string(), "[1.0.0]");
        assert_eq!(exact.inclusive_min(), Some(&v("1.0.0")));

        let bounded = r("[1.0, 2.0)");
        assert_eq!(bounded.to_short_string(), "[1.0.0, 2.0.0)");
        assert_eq!(bounded.inclusive_min(), Some(&v("1.0.0")));

        let exclusive = r("(1.0,)");
        assert!(exclusive.has_lower_bound());
        assert_eq!(exclusive.inclusive_min(), None);
        assert_eq!(exclusive.to_short_string(), "(1.0.0, )");

        let upper_only = r("(,2.0]");
        assert!(!upper_only.has_lower_bound());
        assert_eq!(upper_only.inclusive_min(), None);
        assert_eq!(upper_only.to_short_string(), "(, 2.0.0]");
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert!(VersionRange::parse("").is_err());
        assert!(VersionRange::parse("(1.0)").is_err());
        assert!(VersionRange::parse("[2.0, 1.0]").is_err());
        assert!(VersionRange::parse("[1.0, 1.0)").is_err());
        assert!(VersionRange::parse("[1.0, 2.0, 3.0]").is_err());
        assert!(VersionRange::parse("[1.0").is_err());
        assert!(VersionRange::parse("1.*.3").is_err());
    }

    #[test]
    fn parses_floating_ranges() {
        let any = r("*");
        assert!(any.is_floating());
        assert_eq!(any.inclusive_min(), Some(&v("0.0.0")));
        assert_eq!(any.to_short_string(), "*");

        let minor = r("1.*");
        assert_eq!(minor.inclusive_min(), Some(&v("1.0.0")));
        assert_eq!(minor.to_short_string(), "1.*");

        let pre = r("1.0.0-*");
        assert_eq!(pre.inclusive_min(), Some(&v("1.0.0-0")));
    }

    #[test]
    fn range_equality_is_semantic() {
        assert_eq!(r("1.0"), r("1.0.0"));
        assert_eq!(r("[1.0,2.0)"), r("[1.0.0, 2.0.0)"));
        assert_ne!(r("1.0.0"), r("[1.0.0]"));
        assert_ne!(r("1.0.0"), r("2.0.0"));
        assert_ne!(r("1.*"), r("1.0.0"));
        assert_eq!(r("(,2.0]"), r("(, 2.0.0]"));
    }
}
