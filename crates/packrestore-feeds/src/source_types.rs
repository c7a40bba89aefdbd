use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceProtocol {
    V2,
    V3,
    Folder,
}

impl SourceProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V3 => "v3",
            Self::Folder => "folder",
        }
    }
}

/// A configured package source. Sources are consulted in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSource {
    pub name: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<SourceProtocol>,
    #[serde(default = "source_enabled_default")]
    pub enabled: bool,
}

impl PackageSource {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            protocol: None,
            enabled: true,
        }
    }

    pub fn with_protocol(mut self, protocol: SourceProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn is_http(&self) -> bool {
        let lower = self.location.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    /// Explicit protocol, else inferred: non-http locations are folders and
    /// http locations ending in `index.json` speak v3.
    pub fn resolved_protocol(&self) -> SourceProtocol {
        if !self.is_http() {
            return SourceProtocol::Folder;
        }
        if let Some(protocol) = self.protocol {
            return protocol;
        }
        if self
            .location
            .trim_end_matches('/')
            .to_ascii_lowercase()
            .ends_with("index.json")
        {
            SourceProtocol::V3
        } else {
            SourceProtocol::V2
        }
    }
}

pub(crate) fn source_enabled_default() -> bool {
    true
}
