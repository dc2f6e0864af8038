use serde::Deserialize;

use crate::error::{Result, UpdateError};
use crate::version::VersionCode;

/// One entry of the remotely hosted version table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    pub version: VersionCode,
    pub release_date: String,
    pub update_url: String,
    /// Expected SHA-256 digest (hex encoded, lowercase) of the package.
    pub content_hash: String,
    /// Oldest client this package supports. Parsed and carried, but the
    /// update flow does not currently gate on it.
    pub min_client_version: VersionCode,
    pub description: String,
}

/// The remotely hosted update catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTable {
    pub latest_version: VersionCode,
    pub versions: Vec<UpdateInfo>,
}

impl VersionTable {
    /// Find the entry for an exact version, if the catalog lists one.
    pub fn find(&self, version: VersionCode) -> Option<&UpdateInfo> {
        self.versions.iter().find(|info| info.version == version)
    }
}

#[derive(Deserialize)]
struct RawVersionTable {
    latest_version: String,
    versions: Vec<RawUpdateInfo>,
}

#[derive(Deserialize)]
struct RawUpdateInfo {
    version: String,
    release_date: String,
    update_url: String,
    hash: String,
    min_client_version: String,
    description: String,
}

/// Parse a version table document.
///
/// A malformed `latest_version` fails the whole parse; an entry with a
/// malformed `version` or `min_client_version` is skipped with a warning so a
/// single bad catalog row cannot block updates to the remaining versions.
pub fn parse_version_table(body: &str) -> Result<VersionTable> {
    let raw: RawVersionTable = serde_json::from_str(body)
        .map_err(|err| UpdateError::protocol(format!("invalid version table: {err}")))?;

    let latest_version = raw.latest_version.parse::<VersionCode>()?;

    let mut versions = Vec::with_capacity(raw.versions.len());
    for entry in raw.versions {
        let version = match entry.version.parse::<VersionCode>() {
            Ok(version) => version,
            Err(err) => {
                tracing::warn!(%err, "skipping catalog entry with invalid version");
                continue;
            }
        };
        let min_client_version = match entry.min_client_version.parse::<VersionCode>() {
            Ok(version) => version,
            Err(err) => {
                tracing::warn!(%err, %version, "skipping catalog entry with invalid min_client_version");
                continue;
            }
        };

        versions.push(UpdateInfo {
            version,
            release_date: entry.release_date,
            update_url: entry.update_url,
            content_hash: entry.hash,
            min_client_version,
            description: entry.description,
        });
    }

    Ok(VersionTable {
        latest_version,
        versions,
    })
}
