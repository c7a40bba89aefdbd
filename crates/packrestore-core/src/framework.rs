use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameworkFamily {
    Any,
    NetFramework,
    NetCoreApp,
    NetStandard,
    /// Windows Store (`win8`, `netcore45`, `netcore50`).
    NetCore,
    Uap,
    WindowsPhoneApp,
    Portable,
    Native,
}

impl FrameworkFamily {
    fn identifier(self) -> &'static str {
        match self {
            Self::Any => "Any",
            Self::NetFramework => ".NETFramework",
            Self::NetCoreApp => ".NETCoreApp",
            Self::NetStandard => ".NETStandard",
            Self::NetCore => ".NETCore",
            Self::Uap => "UAP",
            Self::WindowsPhoneApp => "WindowsPhoneApp",
            Self::Portable => ".NETPortable",
            Self::Native => "native",
        }
    }

    fn from_identifier(identifier: &str) -> Option<Self> {
        let family = match identifier.to_ascii_lowercase().as_str() {
            "any" => Self::Any,
            ".netframework" => Self::NetFramework,
            ".netcoreapp" => Self::NetCoreApp,
            ".netstandard" => Self::NetStandard,
            ".netcore" => Self::NetCore,
            "uap" => Self::Uap,
            "windowsphoneapp" => Self::WindowsPhoneApp,
            ".netportable" => Self::Portable,
            "native" => Self::Native,
            _ => return None,
        };
        Some(family)
    }
}

/// A target framework moniker such as `net45`, `netstandard2.0` or
/// `portable-net45+win8`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetFramework {
    family: FrameworkFamily,
    version: [u32; 4],
    platform: Option<String>,
    members: Vec<TargetFramework>,
}

impl TargetFramework {
    pub fn any() -> Self {
        Self::new(FrameworkFamily::Any, [0; 4])
    }

    pub fn new(family: FrameworkFamily, version: [u32; 4]) -> Self {
        Self {
            family,
            version,
            platform: None,
            members: Vec::new(),
        }
    }

    /// Accepts short folder names (`net45`, `net8.0-windows`) and full names
    /// (`.NETFramework,Version=v4.5`).
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("target framework must not be empty"));
        }
        if trimmed.contains(',') {
            return parse_full_name(trimmed);
        }
        parse_short_name(trimmed)
    }

    pub fn family(&self) -> FrameworkFamily {
        self.family
    }

    pub fn version(&self) -> [u32; 4] {
        self.version
    }

    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    pub fn portable_members(&self) -> &[TargetFramework] {
        &self.members
    }

    pub fn is_any(&self) -> bool {
        self.family == FrameworkFamily::Any
    }

    pub fn short_folder_name(&self) -> String {
        let [major, minor, build, _] = self.version;
        let mut name = match self.family {
            FrameworkFamily::Any => "any".to_string(),
            FrameworkFamily::Native => "native".to_string(),
            FrameworkFamily::NetFramework => format!("net{}", compact_version(self.version)),
            FrameworkFamily::NetCoreApp if major >= 5 => format!("net{major}.{minor}"),
            FrameworkFamily::NetCoreApp => format!("netcoreapp{major}.{minor}"),
            FrameworkFamily::NetStandard => format!("netstandard{major}.{minor}"),
            FrameworkFamily::NetCore => format!("netcore{}", compact_version(self.version)),
            FrameworkFamily::Uap if build > 0 => format!("uap{major}.{minor}.{build}"),
            FrameworkFamily::Uap => format!("uap{major}.{minor}"),
            FrameworkFamily::WindowsPhoneApp => format!("wpa{}", compact_version(self.version)),
            FrameworkFamily::Portable => format!(
                "portable-{}",
                self.members
                    .iter()
                    .map(Self::short_folder_name)
                    .collect::<Vec<_>>()
                    .join("+")
            ),
        };
        if let Some(platform) = &self.platform {
            name.push('-');
            name.push_str(platform);
        }
        name
    }

    /// `.NETFramework,Version=v4.5` style name.
    pub fn full_name(&self) -> String {
        match self.family {
            FrameworkFamily::Any | FrameworkFamily::Native | FrameworkFamily::Portable => {
                self.short_folder_name()
            }
            family => {
                let [major, minor, build, revision] = self.version;
                let mut version = format!("{major}.{minor}");
                if build > 0 || revision > 0 {
                    version.push_str(&format!(".{build}"));
                }
                if revision > 0 {
                    version.push_str(&format!(".{revision}"));
                }
                match &self.platform {
                    Some(platform) => format!(
                        "{},Version=v{version},Platform={platform}",
                        family.identifier()
                    ),
                    None => format!("{},Version=v{version}", family.identifier()),
                }
            }
        }
    }

    /// Whether a project targeting `self` can consume assets built for
    /// `package`.
    pub fn supports(&self, package: &TargetFramework) -> bool {
        if package.is_any() {
            return true;
        }
        if self.family == FrameworkFamily::Portable {
            return !self.members.is_empty()
                && self.members.iter().all(|member| member.supports(package));
        }
        if package.family == FrameworkFamily::Portable {
            return package.members.iter().any(|member| self.supports(member));
        }
        if let Some(platform) = &package.platform {
            let same_platform = self
                .platform
                .as_ref()
                .is_some_and(|own| own.eq_ignore_ascii_case(platform));
            if !same_platform {
                return false;
            }
        }

        if self.family == package.family {
            return package.version <= self.version;
        }
        match package.family {
            FrameworkFamily::NetStandard => self
                .netstandard_equivalent()
                .is_some_and(|supported| package.version <= supported),
            FrameworkFamily::NetCore if self.family == FrameworkFamily::Uap => {
                package.version <= [5, 0, 0, 0]
            }
            FrameworkFamily::WindowsPhoneApp if self.family == FrameworkFamily::Uap => {
                package.version <= [8, 1, 0, 0]
            }
            _ => false,
        }
    }

    /// Highest .NET Standard version this framework implements.
    fn netstandard_equivalent(&self) -> Option<[u32; 4]> {
        let version = self.version;
        let standard = match self.family {
            FrameworkFamily::NetStandard => return Some(version),
            FrameworkFamily::NetFramework => {
                if version >= [4, 6, 1, 0] {
                    [2, 0]
                } else if version >= [4, 6, 0, 0] {
                    [1, 3]
                } else if version >= [4, 5, 1, 0] {
                    [1, 2]
                } else if version >= [4, 5, 0, 0] {
                    [1, 1]
                } else {
                    return None;
                }
            }
            FrameworkFamily::NetCoreApp => {
                if version >= [3, 0, 0, 0] {
                    [2, 1]
                } else if version >= [2, 0, 0, 0] {
                    [2, 0]
                } else {
                    [1, 6]
                }
            }
            FrameworkFamily::Uap => {
                if version >= [10, 0, 16299, 0] {
                    [2, 0]
                } else if version >= [10, 0, 0, 0] {
                    [1, 4]
                } else {
                    return None;
                }
            }
            FrameworkFamily::NetCore => {
                if version >= [5, 0, 0, 0] {
                    [1, 4]
                } else if version >= [4, 5, 1, 0] {
                    [1, 2]
                } else if version >= [4, 5, 0, 0] {
                    [1, 1]
                } else {
                    return None;
                }
            }
            FrameworkFamily::WindowsPhoneApp if version >= [8, 1, 0, 0] => [1, 2],
            _ => return None,
        };
        Some([standard[0], standard[1], 0, 0])
    }

    /// Picks the closest compatible framework out of `candidates`.
    ///
    /// Same family beats .NET Standard, which beats other compatible
    /// families, then portable profiles (fewest members first), then `any`.
    pub fn get_nearest<'a>(&self, candidates: &'a [TargetFramework]) -> Option<&'a TargetFramework> {
        candidates
            .iter()
            .filter(|candidate| self.supports(candidate))
            .min_by(|left, right| self.compare_candidates(left, right))
    }

    /// As [`Self::get_nearest`], then each fallback framework in order.
    pub fn get_nearest_with_fallback<'a>(
        &self,
        fallbacks: &[TargetFramework],
        candidates: &'a [TargetFramework],
    ) -> Option<&'a TargetFramework> {
        std::iter::once(self)
            .chain(fallbacks)
            .find_map(|framework| framework.get_nearest(candidates))
    }

    fn tier(&self, candidate: &TargetFramework) -> u8 {
        if candidate.is_any() {
            5
        } else if candidate.family == FrameworkFamily::Portable {
            4
        } else if candidate.family == self.family {
            if candidate.platform.is_some() {
                0
            } else {
                1
            }
        } else if candidate.family == FrameworkFamily::NetStandard {
            2
        } else {
            3
        }
    }

    fn compare_candidates(&self, left: &TargetFramework, right: &TargetFramework) -> Ordering {
        self.tier(left)
            .cmp(&self.tier(right))
            .then_with(|| left.members.len().cmp(&right.members.len()))
            .then_with(|| right.version.cmp(&left.version))
            .then_with(|| left.short_folder_name().cmp(&right.short_folder_name()))
    }
}

fn compact_version(version: [u32; 4]) -> String {
    let mut parts = version.to_vec();
    while parts.len() > 2 && parts.last() == Some(&0) {
        parts.pop();
    }
    if parts.iter().all(|part| *part < 10) {
        parts.iter().map(ToString::to_string).collect()
    } else {
        parts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

fn parse_version_digits(raw: &str, input: &str) -> anyhow::Result<[u32; 4]> {
    let mut version = [0_u32; 4];
    if raw.is_empty() {
        return Ok(version);
    }
    if !raw.chars().all(|ch| ch.is_ascii_digit() || ch == '.') {
        return Err(anyhow!("invalid target framework '{input}'"));
    }
    let parts: Vec<&str> = if raw.contains('.') {
        raw.split('.').collect()
    } else {
        raw.char_indices().map(|(index, _)| &raw[index..index + 1]).collect()
    };
    if parts.len() > 4 {
        return Err(anyhow!("invalid target framework '{input}': version has too many parts"));
    }
    for (slot, part) in version.iter_mut().zip(parts) {
        *slot = part
            .parse::<u32>()
            .with_context(|| format!("invalid target framework '{input}'"))?;
    }
    Ok(version)
}

fn parse_short_name(input: &str) -> anyhow::Result<TargetFramework> {
    let lowered = input.to_ascii_lowercase();
    match lowered.as_str() {
        "any" | "agnostic" => return Ok(TargetFramework::any()),
        "native" => return Ok(TargetFramework::new(FrameworkFamily::Native, [0; 4])),
        _ => {}
    }

    if let Some(rest) = lowered.strip_prefix("portable") {
        let members_raw = rest
            .split_once('-')
            .map(|(_, members)| members)
            .ok_or_else(|| anyhow!("invalid target framework '{input}': portable profile has no members"))?;
        let mut members = members_raw
            .split('+')
            .filter(|member| !member.is_empty())
            .map(parse_short_name)
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("invalid target framework '{input}'"))?;
        if members.is_empty() {
            return Err(anyhow!("invalid target framework '{input}': portable profile has no members"));
        }
        members.sort_by_key(TargetFramework::short_folder_name);
        return Ok(TargetFramework {
            family: FrameworkFamily::Portable,
            version: [0; 4],
            platform: None,
            members,
        });
    }

    let (moniker, platform) = match lowered.split_once('-') {
        Some((moniker, platform)) if !platform.is_empty() => (moniker, Some(platform.to_string())),
        Some(_) => return Err(anyhow!("invalid target framework '{input}'")),
        None => (lowered.as_str(), None),
    };

    let split = moniker
        .find(|ch: char| ch.is_ascii_digit())
        .unwrap_or(moniker.len());
    let (identifier, digits) = moniker.split_at(split);
    let version = parse_version_digits(digits, input)?;

    let family = match identifier {
        "net" if version[0] >= 5 => FrameworkFamily::NetCoreApp,
        "net" => FrameworkFamily::NetFramework,
        "netcoreapp" => FrameworkFamily::NetCoreApp,
        "netstandard" => FrameworkFamily::NetStandard,
        "netcore" => FrameworkFamily::NetCore,
        "win" => {
            let version = match version {
                [8, 0, 0, 0] => [4, 5, 0, 0],
                [8, 1, 0, 0] => [4, 5, 1, 0],
                _ => return Err(anyhow!("unsupported target framework '{input}'")),
            };
            return Ok(TargetFramework {
                family: FrameworkFamily::NetCore,
                version,
                platform,
                members: Vec::new(),
            });
        }
        "uap" => FrameworkFamily::Uap,
        "wpa" => FrameworkFamily::WindowsPhoneApp,
        _ => return Err(anyhow!("unsupported target framework '{input}'")),
    };
    if digits.is_empty() {
        return Err(anyhow!("invalid target framework '{input}': missing version"));
    }

    Ok(TargetFramework {
        family,
        version,
        platform,
        members: Vec::new(),
    })
}

fn parse_full_name(input: &str) -> anyhow::Result<TargetFramework> {
    let mut parts = input.split(',').map(str::trim);
    let identifier = parts.next().unwrap_or_default();
    let family = FrameworkFamily::from_identifier(identifier)
        .ok_or_else(|| anyhow!("unsupported target framework '{input}'"))?;
    if family == FrameworkFamily::Portable {
        return Err(anyhow!(
            "unsupported target framework '{input}': use the portable-<members> form"
        ));
    }

    let mut version = [0_u32; 4];
    let mut platform = None;
    for part in parts {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid target framework '{input}'"))?;
        match key.trim().to_ascii_lowercase().as_str() {
            "version" => {
                let raw = value.trim().trim_start_matches(['v', 'V']);
                if !raw.contains('.') {
                    return Err(anyhow!("invalid target framework '{input}': version must be dotted"));
                }
                version = parse_version_digits(raw, input)?;
            }
            "platform" => platform = Some(value.trim().to_ascii_lowercase()),
            "profile" => {}
            _ => return Err(anyhow!("invalid target framework '{input}'")),
        }
    }

    Ok(TargetFramework {
        family,
        version,
        platform,
        members: Vec::new(),
    })
}

impl fmt::Display for TargetFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_folder_name())
    }
}

impl FromStr for TargetFramework {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialOrd for TargetFramework {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by short folder name so framework-keyed output is stable.
impl Ord for TargetFramework {
    fn cmp(&self, other: &Self) -> Ordering {
        self.short_folder_name()
            .cmp(&other.short_folder_name())
            .then_with(|| self.family.cmp(&other.family))
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl Serialize for TargetFramework {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.short_folder_name())
    }
}

impl<'de> Deserialize<'de> for TargetFramework {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
