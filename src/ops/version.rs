//! Version information and client compatibility checking.
//!
//! Clients announce their version in the `x-rudder-api-client` header.
//! A client is compatible when the server satisfies the caret range
//! `^client.major.client.minor.x`; pre-release builds must match exactly.

use std::cmp::Ordering;
use std::fmt;

/// Marker carried in the build metadata of development builds.
const UNRELEASED_MARKER: &str = "unreleased";

/// Parsed semantic version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemVer {
    /// Major version.
    pub major: u64,
    /// Minor version.
    pub minor: u64,
    /// Patch version.
    pub patch: u64,
    /// Pre-release identifier, without the leading `-`.
    pub pre: Option<String>,
    /// Build metadata, without the leading `+`.
    pub build: Option<String>,
}

impl SemVer {
    /// Parse a version string.
    ///
    /// Accepts an optional `v` prefix and missing minor/patch components
    /// (`v2`, `2.1`), which are treated as zero.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let input = input.strip_prefix('v').unwrap_or(input);
        if input.is_empty() {
            return None;
        }

        let (rest, build) = match input.split_once('+') {
            Some((rest, build)) if !build.is_empty() => (rest, Some(build.to_string())),
            Some(_) => return None,
            None => (input, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return None,
            None => (rest, None),
        };

        let mut parts = core.split('.');
        let major = parse_component(parts.next())?;
        let minor = match parts.next() {
            Some(p) => parse_component(Some(p))?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => parse_component(Some(p))?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            major,
            minor,
            patch,
            pre,
            build,
        })
    }

    /// Check if this is a development build.
    pub fn is_unreleased(&self) -> bool {
        self.build
            .as_deref()
            .is_some_and(|b| b.ends_with(UNRELEASED_MARKER))
    }

    /// Compare precedence, ignoring build metadata.
    fn precedence(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }

    /// Check if `server` satisfies `^self.major.self.minor.x`.
    fn caret_admits(&self, server: &Self) -> bool {
        let floor = Self {
            major: self.major,
            minor: self.minor,
            patch: 0,
            pre: None,
            build: None,
        };
        if server.precedence(&floor) == Ordering::Less {
            return false;
        }
        if self.major == 0 {
            server.major == 0 && server.minor == self.minor
        } else {
            server.major == self.major
        }
    }
}

fn parse_component(part: Option<&str>) -> Option<u64> {
    let part = part?;
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.pre {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

/// Check whether a client version is compatible with the server version.
///
/// Empty or malformed client versions are never compatible. Development
/// builds (build metadata ending in `unreleased`) on either side are
/// compatible with any well-formed version.
pub fn is_compatible(client: &str, server: &str) -> bool {
    let Some(client) = SemVer::parse(client) else {
        return false;
    };
    let Some(server) = SemVer::parse(server) else {
        return false;
    };

    if client.is_unreleased() || server.is_unreleased() {
        return true;
    }

    if client.pre.is_some() || server.pre.is_some() {
        return client.precedence(&server) == Ordering::Equal;
    }

    client.caret_admits(&server)
}

/// Version information for the Rudder binary.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Semantic version string (e.g. `v0.3.0`).
    pub sem_ver: String,
    /// Git commit hash.
    pub git_commit: Option<String>,
    /// Git tree state (`clean` or `dirty`).
    pub git_tree_state: Option<String>,
}

impl VersionInfo {
    /// Create version info with an explicit version string.
    pub fn new(sem_ver: impl Into<String>) -> Self {
        Self {
            sem_ver: sem_ver.into(),
            git_commit: None,
            git_tree_state: None,
        }
    }

    /// Get the version of this build.
    pub fn current() -> Self {
        Self {
            sem_ver: format!("v{}", env!("CARGO_PKG_VERSION")),
            git_commit: option_env!("GIT_COMMIT").map(String::from),
            git_tree_state: option_env!("GIT_TREE_STATE").map(String::from),
        }
    }

    /// Check whether the given client version may talk to this server.
    pub fn admits_client(&self, client_version: &str) -> bool {
        is_compatible(client_version, &self.sem_ver)
    }
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.git_commit {
            Some(commit) => write!(f, "{}+g{}", self.sem_ver, commit),
            None => write!(f, "{}", self.sem_ver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let v = SemVer::parse("v2.3.1-rc.1+abc").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (2, 3, 1));
        assert_eq!(v.pre.as_deref(), Some("rc.1"));
        assert_eq!(v.build.as_deref(), Some("abc"));

        let v = SemVer::parse("2.1").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (2, 1, 0));

        assert!(SemVer::parse("").is_none());
        assert!(SemVer::parse("v").is_none());
        assert!(SemVer::parse("banana").is_none());
        assert!(SemVer::parse("1.2.3.4").is_none());
        assert!(SemVer::parse("1.-2.3").is_none());
        assert!(SemVer::parse("1.2.3-").is_none());
    }

    #[test]
    fn test_compatible_same_minor() {
        assert!(is_compatible("v2.3.0", "v2.3.5"));
        assert!(is_compatible("2.3.9", "v2.3.0"));
        assert!(is_compatible("v2.3.0", "v2.7.0"));
    }

    #[test]
    fn test_incompatible_versions() {
        assert!(!is_compatible("v2.4.0", "v2.3.0"));
        assert!(!is_compatible("v1.9.0", "v2.0.0"));
        assert!(!is_compatible("v3.0.0", "v2.9.0"));
        assert!(!is_compatible("v0.2.0", "v0.3.0"));
        assert!(is_compatible("v0.3.1", "v0.3.0"));
    }

    #[test]
    fn test_empty_or_malformed_client() {
        assert!(!is_compatible("", "v2.3.0"));
        assert!(!is_compatible("not-a-version", "v2.3.0"));
        assert!(!is_compatible("", "v2.3.0+unreleased"));
    }

    #[test]
    fn test_prerelease_requires_exact_match() {
        assert!(is_compatible("v2.3.0-rc.1", "v2.3.0-rc.1"));
        assert!(!is_compatible("v2.3.0-rc.1", "v2.3.0-rc.2"));
        assert!(!is_compatible("v2.3.0", "v2.3.1-rc.1"));
    }

    #[test]
    fn test_unreleased_builds() {
        assert!(is_compatible("v9.9.9+unreleased", "v2.3.0"));
        assert!(is_compatible("v1.0.0", "v2.3.0+unreleased"));
    }

    #[test]
    fn test_version_info() {
        let info = VersionInfo::new("v0.3.0");
        assert!(info.admits_client("v0.3.0"));
        assert!(!info.admits_client("v0.2.0"));
        assert_eq!(info.to_string(), "v0.3.0");

        let current = VersionInfo::current();
        assert!(current.admits_client(&current.sem_ver));
    }
}
