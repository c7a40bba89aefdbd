use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use anyhow::{anyhow, Context};
use semver::{BuildMetadata, Prerelease};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A package version: one to four numeric parts, an optional release label
/// and optional build metadata.
///
/// Release labels compare case-insensitively and metadata never takes part
/// in equality or ordering, so `1.0.0-Beta+abc` equals `1.0.0-beta`.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: u64,
    release: Prerelease,
    release_key: Prerelease,
    metadata: BuildMetadata,
}

impl PackageVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            revision: 0,
            release: Prerelease::EMPTY,
            release_key: Prerelease::EMPTY,
            metadata: BuildMetadata::EMPTY,
        }
    }

    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("version must not be empty"));
        }

        let (without_metadata, metadata) = match trimmed.split_once('+') {
            Some((version, metadata)) => (version, Some(metadata)),
            None => (trimmed, None),
        };
        let (numbers, label) = match without_metadata.split_once('-') {
            Some((numbers, label)) => (numbers, Some(label)),
            None => (without_metadata, None),
        };

        let parts = numbers.split('.').collect::<Vec<_>>();
        if parts.len() > 4 {
            return Err(anyhow!("invalid version '{input}': more than four numeric parts"));
        }
        let mut values = [0_u64; 4];
        for (index, part) in parts.iter().enumerate() {
            if part.is_empty() || !part.chars().all(|ch| ch.is_ascii_digit()) {
                return Err(anyhow!("invalid version '{input}': '{part}' is not numeric"));
            }
            values[index] = part
                .parse::<u64>()
                .with_context(|| format!("invalid version '{input}'"))?;
        }

        let release = match label {
            Some("") => return Err(anyhow!("invalid version '{input}': empty release label")),
            Some(label) => Prerelease::new(label)
                .with_context(|| format!("invalid release label in version '{input}'"))?,
            None => Prerelease::EMPTY,
        };
        let release_key = Prerelease::new(&release.as_str().to_ascii_lowercase())
            .with_context(|| format!("invalid release label in version '{input}'"))?;
        let metadata = match metadata {
            Some(metadata) => BuildMetadata::new(metadata)
                .with_context(|| format!("invalid metadata in version '{input}'"))?,
            None => BuildMetadata::EMPTY,
        };

        Ok(Self {
            major: values[0],
            minor: values[1],
            patch: values[2],
            revision: values[3],
            release,
            release_key,
            metadata,
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn release_label(&self) -> &str {
        self.release.as_str()
    }

    pub fn metadata(&self) -> &str {
        self.metadata.as_str()
    }

    pub fn is_prerelease(&self) -> bool {
        !self.release.is_empty()
    }

    /// Same numeric parts, ignoring the release label.
    pub fn same_core(&self, other: &Self) -> bool {
        self.major == other.major
            && self.minor == other.minor
            && self.patch == other.patch
            && self.revision == other.revision
    }

    /// Copy of this version with the given release label (empty for stable).
    pub fn with_release_label(&self, label: &str) -> anyhow::Result<Self> {
        let mut copy = self.clone();
        copy.release = if label.is_empty() {
            Prerelease::EMPTY
        } else {
            Prerelease::new(label).with_context(|| format!("invalid release label '{label}'"))?
        };
        copy.release_key = Prerelease::new(&copy.release.as_str().to_ascii_lowercase())
            .with_context(|| format!("invalid release label '{label}'"))?;
        Ok(copy)
    }

    pub fn to_normalized_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.revision > 0 {
            write!(f, ".{}", self.revision)?;
        }
        if !self.release.is_empty() {
            write!(f, "-{}", self.release)?;
        }
        Ok(())
    }
}

impl FromStr for PackageVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then(self.revision.cmp(&other.revision))
            .then_with(|| self.release_key.cmp(&other.release_key))
    }
}

impl Hash for PackageVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.revision.hash(state);
        self.release_key.as_str().hash(state);
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PackageVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
