//! Release feed parsing and version comparison.
//!
//! The feed is a GitHub-style releases array. The first entry is the latest
//! release; its tag is the version and its assets carry the firmware image.

use serde::Deserialize;
use std::cmp::Ordering;
use thiserror::Error;

/// Default firmware asset name in a release.
pub const DEFAULT_ASSET_NAME: &str = "firmware.bin";

/// A dotted firmware version such as `v1.4.2`.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    parts: Vec<String>,
}

impl Version {
    /// Parse a version string. A leading `v`/`V` is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if body.is_empty() {
            return None;
        }
        Some(Self {
            raw: trimmed.to_string(),
            parts: body.split('.').map(|p| p.trim().to_string()).collect(),
        })
    }

    /// The version as it was written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_newer_than(&self, other: &Version) -> bool {
        self.cmp(other) == Ordering::Greater
    }
}

fn compare_part(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).map(String::as_str).unwrap_or("0");
            let b = other.parts.get(i).map(String::as_str).unwrap_or("0");
            match compare_part(a, b) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// The firmware image attached to a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub download_url: String,
    pub size: Option<u64>,
    /// Lowercase hex SHA-256 of the image, when published.
    pub sha256: Option<String>,
}

/// The latest published release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: Version,
    pub notes: Option<String>,
    /// `None` when the release has no asset with the expected name.
    pub asset: Option<ReleaseAsset>,
}

/// Problems with the feed document itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReleaseError {
    #[error("Release feed is not valid JSON: {0}")]
    Malformed(String),

    #[error("Release feed contains no releases")]
    Empty,

    #[error("Latest release has no usable tag_name")]
    MissingTag,
}

#[derive(Deserialize)]
struct RawRelease {
    tag_name: Option<String>,
    body: Option<String>,
    #[serde(default)]
    assets: Vec<RawAsset>,
}

#[derive(Deserialize)]
struct RawAsset {
    name: String,
    browser_download_url: String,
    size: Option<u64>,
    digest: Option<String>,
}

/// Parse a releases feed and pick the asset named `asset_name`.
pub fn parse_release_feed(json: &str, asset_name: &str) -> Result<ReleaseInfo, ReleaseError> {
    let releases: Vec<RawRelease> =
        serde_json::from_str(json).map_err(|e| ReleaseError::Malformed(e.to_string()))?;
    let latest = releases.into_iter().next().ok_or(ReleaseError::Empty)?;

    let version = latest
        .tag_name
        .as_deref()
        .and_then(Version::parse)
        .ok_or(ReleaseError::MissingTag)?;

    let asset = latest
        .assets
        .into_iter()
        .find(|a| a.name == asset_name)
        .map(|a| ReleaseAsset {
            name: a.name,
            download_url: a.browser_download_url,
            size: a.size.filter(|s| *s > 0),
            sha256: a.digest.as_deref().and_then(parse_sha256_digest),
        });

    Ok(ReleaseInfo {
        version,
        notes: latest.body.filter(|b| !b.trim().is_empty()),
        asset,
    })
}

/// Extract the hex from a `sha256:<hex>` digest.
fn parse_sha256_digest(digest: &str) -> Option<String> {
    let hex = digest.strip_prefix("sha256:")?;
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex.to_ascii_lowercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_version_numeric_comparison() {
        assert!(v("v1.10.0").is_newer_than(&v("v1.9.9")));
        assert!(v("2.0").is_newer_than(&v("v1.99.1")));
        assert!(!v("v1.2.0").is_newer_than(&v("1.2")));
        assert_eq!(v("v1.2"), v("1.2.0"));
        assert!(Version::parse("v").is_none());
        assert!(Version::parse("  ").is_none());
    }

    #[test]
    fn test_version_text_components() {
        assert!(v("1.2.rc2").is_newer_than(&v("1.2.rc1")));
        assert_eq!(v("v1.0.0").as_str(), "v1.0.0");
    }

    #[test]
    fn test_parse_feed_picks_first_release_and_asset() {
        let json = r#"[
            {
                "tag_name": "v1.3.0",
                "body": "Bug fixes",
                "assets": [
                    {"name": "notes.txt", "browser_download_url": "https://x/notes.txt", "size": 10},
                    {"name": "firmware.bin", "browser_download_url": "https://x/fw.bin", "size": 1024,
                     "digest": "sha256:ABCDEF0123456789abcdef0123456789abcdef0123456789abcdef0123456789"}
                ]
            },
            {"tag_name": "v1.2.0", "assets": []}
        ]"#;

        let info = parse_release_feed(json, DEFAULT_ASSET_NAME).unwrap();

        assert_eq!(info.version.as_str(), "v1.3.0");
        assert_eq!(info.notes.as_deref(), Some("Bug fixes"));
        let asset = info.asset.unwrap();
        assert_eq!(asset.download_url, "https://x/fw.bin");
        assert_eq!(asset.size, Some(1024));
        assert_eq!(
            asset.sha256.as_deref(),
            Some("abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789")
        );
    }

    #[test]
    fn test_parse_feed_errors() {
        assert!(matches!(
            parse_release_feed("{\"tag_name\": \"v1\"}", DEFAULT_ASSET_NAME),
            Err(ReleaseError::Malformed(_))
        ));
        assert_eq!(
            parse_release_feed("[]", DEFAULT_ASSET_NAME),
            Err(ReleaseError::Empty)
        );
        assert_eq!(
            parse_release_feed("[{\"assets\": []}]", DEFAULT_ASSET_NAME),
            Err(ReleaseError::MissingTag)
        );
    }

    #[test]
    fn test_parse_feed_without_matching_asset() {
        let json = r#"[{"tag_name": "v2.0.0", "assets": [{"name": "other.bin", "browser_download_url": "u"}]}]"#;
        let info = parse_release_feed(json, DEFAULT_ASSET_NAME).unwrap();
        assert_eq!(info.asset, None);
        assert_eq!(info.notes, None);
    }
}
