use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use anyhow::anyhow;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::version::PackageVersion;

const MAX_PACKAGE_ID_LENGTH: usize = 100;

pub fn validate_package_id(id: &str) -> anyhow::Result<()> {
    if id.is_empty() {
        return Err(anyhow!("package id must not be empty"));
    }
    if id.len() > MAX_PACKAGE_ID_LENGTH {
        return Err(anyhow!(
            "package id '{id}' exceeds {MAX_PACKAGE_ID_LENGTH} characters"
        ));
    }
    if id.starts_with(['.', '-']) || id.ends_with(['.', '-']) {
        return Err(anyhow!(
            "invalid package id '{id}': must not start or end with '.' or '-'"
        ));
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'))
    {
        return Err(anyhow!(
            "invalid package id '{id}': use only ASCII letters, digits, '.', '-' and '_'"
        ));
    }
    Ok(())
}

/// Package identifier. Comparison ignores ASCII case; the original casing is
/// kept for display.
#[derive(Debug, Clone)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn parse(id: &str) -> anyhow::Result<Self> {
        validate_package_id(id)?;
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used for folder names and feed URLs.
    pub fn to_lower(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PackageId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl PartialEq for PackageId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for PackageId {}

impl PartialOrd for PackageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageId {
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.0.bytes().map(|byte| byte.to_ascii_lowercase());
        let right = other.0.bytes().map(|byte| byte.to_ascii_lowercase());
        left.cmp(right)
    }
}

impl Hash for PackageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl Serialize for PackageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

/// A concrete package: id plus exact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub id: PackageId,
    pub version: PackageVersion,
}

impl PackageIdentity {
    pub fn new(id: impl Into<PackageId>, version: PackageVersion) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    /// `{id}.{version}`, the stem used for package files and v2 folders.
    pub fn file_stem(&self) -> String {
        format!("{}.{}", self.id, self.version)
    }

    pub fn nupkg_file_name(&self) -> String {
        format!("{}.{}.nupkg", self.id.to_lower(), self.version.to_normalized_string().to_ascii_lowercase())
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}
