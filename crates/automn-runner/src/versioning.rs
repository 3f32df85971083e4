// SPDX-License-Identifier: MIT OR Apache-2.0
//! A minimal `major.minor` version comparator used to warn when a host or
//! runner falls below the other side's advertised minimum, without ever
//! failing registration over it.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
    major: u32,
    minor: u32,
}

impl ApiVersion {
    /// Parses the leading `major.minor` of a version string, ignoring any
    /// further `.patch` or pre-release suffix. Returns `None` for anything
    /// that doesn't start with `<digits>.<digits>`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, '.');
        let major: u32 = parts.next()?.parse().ok()?;
        let minor: u32 = parts.next()?.split(|c: char| !c.is_ascii_digit()).next()?.parse().ok()?;
        Some(Self { major, minor })
    }

    /// `self < other`, i.e. `self` does not satisfy a `minimum = other`
    /// requirement.
    pub fn is_older_than(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Less)
    }
}

impl PartialOrd for ApiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ApiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major.cmp(&other.major).then(self.minor.cmp(&other.minor))
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// `true` when `actual` is known and falls below `minimum`. Unparseable or
/// absent versions never block registration — they just skip the check.
pub fn below_minimum(actual: Option<&str>, minimum: Option<&str>) -> bool {
    match (actual.and_then(ApiVersion::parse), minimum.and_then(ApiVersion::parse)) {
        (Some(actual), Some(minimum)) => actual.is_older_than(&minimum),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_minor_ignoring_patch() {
        assert_eq!(ApiVersion::parse("1.4.2"), Some(ApiVersion { major: 1, minor: 4 }));
        assert_eq!(ApiVersion::parse("2.0"), Some(ApiVersion { major: 2, minor: 0 }));
        assert_eq!(ApiVersion::parse("not-a-version"), None);
    }

    #[test]
    fn older_minor_is_below_minimum() {
        assert!(below_minimum(Some("1.2.0"), Some("1.5.0")));
        assert!(!below_minimum(Some("1.9.0"), Some("1.5.0")));
    }

    #[test]
    fn missing_versions_never_block() {
        assert!(!below_minimum(None, Some("1.0.0")));
        assert!(!below_minimum(Some("garbage"), Some("1.0.0")));
    }
}
