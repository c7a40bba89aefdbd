use std::fmt;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::version::PackageVersion;

/// How a non-floating range picks among the versions that satisfy it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyBehavior {
    #[default]
    Lowest,
    HighestPatch,
    HighestMinor,
    Highest,
}

impl DependencyBehavior {
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "lowest" => Ok(Self::Lowest),
            "highest-patch" | "highestpatch" => Ok(Self::HighestPatch),
            "highest-minor" | "highestminor" => Ok(Self::HighestMinor),
            "highest" => Ok(Self::Highest),
            other => Err(anyhow!(
                "unsupported dependency version behavior '{other}'; supported: lowest, highest-patch, highest-minor, highest"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatBehavior {
    /// `1.0.0-*`, `1.0.0-beta*`
    Prerelease,
    /// `1.0.0.*-*`
    PrereleaseRevision,
    /// `1.0.*-beta*`
    PrereleasePatch,
    /// `1.*-*`
    PrereleaseMinor,
    /// `*-rc*`
    PrereleaseMajor,
    /// `1.0.0.*`
    Revision,
    /// `1.0.*`
    Patch,
    /// `1.*`
    Minor,
    /// `*`
    Major,
    /// `*-*`
    AbsoluteLatest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPolicy {
    PrereleaseHighest,
    StableOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatRange {
    behavior: FloatBehavior,
    min_version: PackageVersion,
    release_prefix: String,
}

impl FloatRange {
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        if trimmed == "*" {
            return Ok(Self {
                behavior: FloatBehavior::Major,
                min_version: PackageVersion::new(0, 0, 0),
                release_prefix: String::new(),
            });
        }
        if trimmed == "*-*" {
            return Ok(Self {
                behavior: FloatBehavior::AbsoluteLatest,
                min_version: PackageVersion::new(0, 0, 0).with_release_label("0")?,
                release_prefix: String::new(),
            });
        }

        if let Some((core, label)) = trimmed.split_once('-') {
            let Some(prefix) = label.strip_suffix('*') else {
                return Err(anyhow!("invalid floating version '{input}'"));
            };
            if prefix.contains('*') {
                return Err(anyhow!("unsupported floating version '{input}'"));
            }
            // `1.*-beta*` floats the core as well; the star must end it.
            let (behavior, core) = match core.strip_suffix('*') {
                Some(stable) if !stable.contains('*') && (stable.is_empty() || stable.ends_with('.')) => {
                    let core = format!("{stable}0");
                    let behavior = match core.split('.').count() {
                        1 => FloatBehavior::PrereleaseMajor,
                        2 => FloatBehavior::PrereleaseMinor,
                        3 => FloatBehavior::PrereleasePatch,
                        4 => FloatBehavior::PrereleaseRevision,
                        _ => return Err(anyhow!("invalid floating version '{input}'")),
                    };
                    (behavior, core)
                }
                Some(_) => return Err(anyhow!("unsupported floating version '{input}'")),
                None if core.contains('*') => {
                    return Err(anyhow!("unsupported floating version '{input}'"))
                }
                None => (FloatBehavior::Prerelease, core.to_string()),
            };
            let min_label = prefix.trim_end_matches(['.', '-']);
            let min_label = if min_label.is_empty() { "0" } else { min_label };
            let min_version = PackageVersion::parse(&core)
                .and_then(|version| version.with_release_label(min_label))
                .with_context(|| format!("invalid floating version '{input}'"))?;
            return Ok(Self {
                behavior,
                min_version,
                release_prefix: prefix.to_string(),
            });
        }

        let Some(core) = trimmed.strip_suffix(".*") else {
            return Err(anyhow!("invalid floating version '{input}'"));
        };
        if core.contains('*') {
            return Err(anyhow!("invalid floating version '{input}'"));
        }
        let behavior = match core.split('.').count() {
            1 => FloatBehavior::Minor,
            2 => FloatBehavior::Patch,
            3 => FloatBehavior::Revision,
            _ => return Err(anyhow!("invalid floating version '{input}'")),
        };
        let min_version = PackageVersion::parse(core)
            .with_context(|| format!("invalid floating version '{input}'"))?;
        Ok(Self {
            behavior,
            min_version,
            release_prefix: String::new(),
        })
    }

    pub fn behavior(&self) -> FloatBehavior {
        self.behavior
    }

    pub fn min_version(&self) -> &PackageVersion {
        &self.min_version
    }

    pub fn release_prefix(&self) -> &str {
        &self.release_prefix
    }

    pub fn policy(&self) -> FloatPolicy {
        match self.behavior {
            FloatBehavior::Revision
            | FloatBehavior::Patch
            | FloatBehavior::Minor
            | FloatBehavior::Major => FloatPolicy::StableOnly,
            _ => FloatPolicy::PrereleaseHighest,
        }
    }

    /// Whether `version` lies inside the floating part of the range.
    ///
    /// Prerelease floats also take the stable release of any core they
    /// cover, which then outranks its prereleases.
    pub fn satisfies_float(&self, version: &PackageVersion) -> bool {
        let min = &self.min_version;
        let label_matches = !version.is_prerelease()
            || version
                .release_label()
                .to_ascii_lowercase()
                .starts_with(&self.release_prefix.to_ascii_lowercase());
        match self.behavior {
            FloatBehavior::AbsoluteLatest => true,
            FloatBehavior::Major => !version.is_prerelease(),
            FloatBehavior::Minor => !version.is_prerelease() && version.major() == min.major(),
            FloatBehavior::Patch => {
                !version.is_prerelease()
                    && version.major() == min.major()
                    && version.minor() == min.minor()
            }
            FloatBehavior::Revision => {
                !version.is_prerelease()
                    && version.major() == min.major()
                    && version.minor() == min.minor()
                    && version.patch() == min.patch()
            }
            FloatBehavior::Prerelease => version.same_core(min) && label_matches,
            FloatBehavior::PrereleaseRevision => {
                version.major() == min.major()
                    && version.minor() == min.minor()
                    && version.patch() == min.patch()
                    && label_matches
            }
            FloatBehavior::PrereleasePatch => {
                version.major() == min.major() && version.minor() == min.minor() && label_matches
            }
            FloatBehavior::PrereleaseMinor => version.major() == min.major() && label_matches,
            FloatBehavior::PrereleaseMajor => label_matches,
        }
    }

    /// Any version at or above the float's minimum may be considered.
    pub fn satisfies(&self, version: &PackageVersion) -> bool {
        version >= &self.min_version
            && (self.policy() == FloatPolicy::PrereleaseHighest || !version.is_prerelease())
    }
}

impl fmt::Display for FloatRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min = &self.min_version;
        match self.behavior {
            FloatBehavior::AbsoluteLatest => write!(f, "*-*"),
            FloatBehavior::Major => write!(f, "*"),
            FloatBehavior::Minor => write!(f, "{}.*", min.major()),
            FloatBehavior::Patch => write!(f, "{}.{}.*", min.major(), min.minor()),
            FloatBehavior::Revision => {
                write!(f, "{}.{}.{}.*", min.major(), min.minor(), min.patch())
            }
            FloatBehavior::Prerelease => {
                write!(f, "{}.{}.{}", min.major(), min.minor(), min.patch())?;
                if min.revision() > 0 {
                    write!(f, ".{}", min.revision())?;
                }
                write!(f, "-{}*", self.release_prefix)
            }
            FloatBehavior::PrereleaseRevision => write!(
                f,
                "{}.{}.{}.*-{}*",
                min.major(),
                min.minor(),
                min.patch(),
                self.release_prefix
            ),
            FloatBehavior::PrereleasePatch => {
                write!(f, "{}.{}.*-{}*", min.major(), min.minor(), self.release_prefix)
            }
            FloatBehavior::PrereleaseMinor => write!(f, "{}.*-{}*", min.major(), self.release_prefix),
            FloatBehavior::PrereleaseMajor => write!(f, "*-{}*", self.release_prefix),
        }
    }
}

/// Bounded interval of versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    min: Option<PackageVersion>,
    min_inclusive: bool,
    max: Option<PackageVersion>,
    max_inclusive: bool,
}

impl VersionRange {
    pub fn all() -> Self {
        Self {
            min: None,
            min_inclusive: false,
            max: None,
            max_inclusive: false,
        }
    }

    pub fn at_least(min: PackageVersion) -> Self {
        Self {
            min: Some(min),
            min_inclusive: true,
            max: None,
            max_inclusive: false,
        }
    }

    pub fn new(
        min: Option<PackageVersion>,
        min_inclusive: bool,
        max: Option<PackageVersion>,
        max_inclusive: bool,
    ) -> anyhow::Result<Self> {
        if let (Some(min), Some(max)) = (&min, &max) {
            if max < min || (max == min && !(min_inclusive && max_inclusive)) {
                return Err(anyhow!("invalid version range: maximum {max} is below minimum {min}"));
            }
        }
        Ok(Self {
            min,
            min_inclusive,
            max,
            max_inclusive,
        })
    }

    pub fn min(&self) -> Option<&PackageVersion> {
        self.min.as_ref()
    }

    pub fn max(&self) -> Option<&PackageVersion> {
        self.max.as_ref()
    }

    pub fn is_min_inclusive(&self) -> bool {
        self.min_inclusive
    }

    pub fn is_max_inclusive(&self) -> bool {
        self.max_inclusive
    }

    pub fn satisfies(&self, version: &PackageVersion) -> bool {
        let above_min = match &self.min {
            Some(min) if self.min_inclusive => version >= min,
            Some(min) => version > min,
            None => true,
        };
        let below_max = match &self.max {
            Some(max) if self.max_inclusive => version <= max,
            Some(max) => version < max,
            None => true,
        };
        above_min && below_max
    }

    /// Prerelease candidates are only considered when a bound asks for one.
    pub fn allows_prerelease(&self) -> bool {
        self.min.as_ref().is_some_and(PackageVersion::is_prerelease)
            || self.max.as_ref().is_some_and(PackageVersion::is_prerelease)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.min_inclusive { '[' } else { '(' };
        let close = if self.max_inclusive { ']' } else { ')' };
        let min = self.min.as_ref().map(ToString::to_string).unwrap_or_default();
        let max = self.max.as_ref().map(ToString::to_string).unwrap_or_default();
        write!(f, "{open}{min}, {max}{close}")
    }
}

/// A requested version: an exact pin, an interval, or a floating request
/// resolved to the best available match at restore time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    Exact(PackageVersion),
    Range(VersionRange),
    Floating(FloatRange),
}

impl VersionConstraint {
    pub fn any() -> Self {
        Self::Range(VersionRange::all())
    }

    /// Parses the range syntax used by package references and nuspec
    /// dependencies: `1.0` is a minimum, `[1.0]` an exact pin.
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::any());
        }

        if !(trimmed.starts_with('[') || trimmed.starts_with('(')) {
            if trimmed.contains('*') {
                return Ok(Self::Floating(FloatRange::parse(trimmed)?));
            }
            let min = PackageVersion::parse(trimmed)
                .with_context(|| format!("invalid version range '{input}'"))?;
            return Ok(Self::Range(VersionRange::at_least(min)));
        }

        if trimmed.len() < 2 {
            return Err(anyhow!("invalid version range '{input}'"));
        }
        let min_inclusive = trimmed.starts_with('[');
        let max_inclusive = match trimmed.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(anyhow!("invalid version range '{input}': missing closing bracket")),
        };
        let inner = trimmed[1..trimmed.len() - 1].trim();

        match inner.split_once(',') {
            None => {
                if !(min_inclusive && max_inclusive) || inner.is_empty() {
                    return Err(anyhow!("invalid version range '{input}'"));
                }
                let version = PackageVersion::parse(inner)
                    .with_context(|| format!("invalid version range '{input}'"))?;
                Ok(Self::Exact(version))
            }
            Some((min_part, max_part)) => {
                if max_part.contains(',') {
                    return Err(anyhow!("invalid version range '{input}'"));
                }
                let min_part = min_part.trim();
                let max_part = max_part.trim();
                if min_part.is_empty() && max_part.is_empty() {
                    return Ok(Self::any());
                }
                if min_part.contains('*') || max_part.contains('*') {
                    return Err(anyhow!(
                        "unsupported version range '{input}': floating bounds are not allowed inside brackets"
                    ));
                }
                let min = (!min_part.is_empty())
                    .then(|| PackageVersion::parse(min_part))
                    .transpose()
                    .with_context(|| format!("invalid version range '{input}'"))?;
                let max = (!max_part.is_empty())
                    .then(|| PackageVersion::parse(max_part))
                    .transpose()
                    .with_context(|| format!("invalid version range '{input}'"))?;
                let range = VersionRange::new(min, min_inclusive, max, max_inclusive)
                    .with_context(|| format!("invalid version range '{input}'"))?;
                Ok(Self::Range(range))
            }
        }
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, Self::Floating(_))
    }

    /// Lowest version the constraint accepts, if it has one.
    pub fn min_version(&self) -> Option<&PackageVersion> {
        match self {
            Self::Exact(version) => Some(version),
            Self::Range(range) if range.is_min_inclusive() => range.min(),
            Self::Range(_) => None,
            Self::Floating(float) => Some(float.min_version()),
        }
    }

    pub fn satisfies(&self, version: &PackageVersion) -> bool {
        match self {
            Self::Exact(pinned) => pinned == version,
            Self::Range(range) => range.satisfies(version),
            Self::Floating(float) => float.satisfies(version),
        }
    }

    fn considers(&self, version: &PackageVersion) -> bool {
        if !self.satisfies(version) {
            return false;
        }
        match self {
            Self::Exact(_) => true,
            Self::Range(range) => !version.is_prerelease() || range.allows_prerelease(),
            Self::Floating(_) => true,
        }
    }

    /// Picks the version to use from `candidates`.
    ///
    /// Floating constraints prefer the highest candidate inside the float,
    /// then the lowest candidate above the float's minimum. Ranges follow
    /// `behavior`.
    pub fn find_best_match<'a, I>(
        &self,
        candidates: I,
        behavior: DependencyBehavior,
    ) -> Option<&'a PackageVersion>
    where
        I: IntoIterator<Item = &'a PackageVersion>,
    {
        let mut eligible = candidates
            .into_iter()
            .filter(|version| self.considers(version))
            .collect::<Vec<_>>();
        eligible.sort();
        eligible.dedup();

        match self {
            Self::Exact(_) => eligible.first().copied(),
            Self::Floating(float) => eligible
                .iter()
                .rev()
                .find(|version| float.satisfies_float(version))
                .or_else(|| eligible.first())
                .copied(),
            Self::Range(_) => {
                let lowest = *eligible.first()?;
                match behavior {
                    DependencyBehavior::Lowest => Some(lowest),
                    DependencyBehavior::Highest => eligible.last().copied(),
                    DependencyBehavior::HighestMinor => eligible
                        .iter()
                        .rev()
                        .find(|version| version.major() == lowest.major())
                        .copied(),
                    DependencyBehavior::HighestPatch => eligible
                        .iter()
                        .rev()
                        .find(|version| {
                            version.major() == lowest.major() && version.minor() == lowest.minor()
                        })
                        .copied(),
                }
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(version) => write!(f, "[{version}]"),
            Self::Range(range) => write!(f, "{range}"),
            Self::Floating(float) => write!(f, "{float}"),
        }
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
