//! Build version

use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Version of the running build, parsed once per process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Full version string as built
    pub release: String,
}

impl VersionInfo {
    /// Parse an exact `major.minor.patch` string; anything else yields zeros
    pub fn parse(release: &str) -> Self {
        let mut info = Self {
            major: 0,
            minor: 0,
            patch: 0,
            release: release.to_string(),
        };

        let parts: Vec<&str> = release.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
            return info;
        }

        if let (Ok(major), Ok(minor), Ok(patch)) = (parts[0].parse(), parts[1].parse(), parts[2].parse()) {
            info.major = major;
            info.minor = minor;
            info.patch = patch;
        }
        info
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{} ({})", self.major, self.minor, self.patch, self.release)
    }
}

static VERSION: OnceLock<VersionInfo> = OnceLock::new();

pub fn version() -> &'static VersionInfo {
    VERSION.get_or_init(|| VersionInfo::parse(env!("CARGO_PKG_VERSION")))
}
