use std::fmt;
use std::str::FromStr;

/// A version string could not be parsed as `major.minor.patch`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid version string: {0:?}")]
pub struct ParseVersionError(pub String);

/// Three-component device version.
///
/// The device protocol only ever speaks plain `major.minor.patch` strings,
/// so parsing is deliberately stricter than semver: no pre-release or build
/// suffixes, no leading `v`, nothing but digits and two dots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionCode {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionCode {
    /// Create a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for VersionCode {
    type Err = ParseVersionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let component = |part: Option<&str>| -> Result<u32, ParseVersionError> {
            let part = part.ok_or_else(|| ParseVersionError(text.to_owned()))?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseVersionError(text.to_owned()));
            }
            part.parse().map_err(|_| ParseVersionError(text.to_owned()))
        };

        let mut parts = text.split('.');
        let major = component(parts.next())?;
        let minor = component(parts.next())?;
        let patch = component(parts.next())?;
        if parts.next().is_some() {
            return Err(ParseVersionError(text.to_owned()));
        }

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for VersionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
