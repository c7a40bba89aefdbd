use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Restore failures callers branch on. Everything else travels as plain
/// `anyhow` context.
#[derive(Debug, Clone, Error)]
pub enum RestoreError {
    #[error("unable to reach '{url}': {message}")]
    Network { url: String, message: String },

    #[error("invalid response from '{url}': {message}")]
    Protocol { url: String, message: String },

    #[error("response status code does not indicate success: {status} ({url})")]
    HttpStatus { url: String, status: u16 },

    #[error("Too many automatic redirections were attempted ({max} hops from '{url}')")]
    TooManyRedirects { url: String, max: usize },

    #[error("invalid redirect from '{url}': location '{location}' is not an absolute url")]
    InvalidRedirect { url: String, location: String },

    #[error("'{url}' requires authentication ({challenge})")]
    Unauthorized { url: String, challenge: String },

    #[error("unable to find package '{id}' with version '{requested}'")]
    VersionNotFound { id: String, requested: String },

    #[error("There are duplicate packages: {}", .packages.join(", "))]
    DuplicatePackages { packages: Vec<String> },

    #[error("'{id} {version}' package requires client version '{required}' or above, but the current client version is '{current}'")]
    MinClientVersion {
        id: String,
        version: String,
        required: String,
        current: String,
    },

    #[error("package '{id} {version}' is not compatible with '{framework}'")]
    IncompatibleFramework {
        id: String,
        version: String,
        framework: String,
    },

    #[error("failed to load project '{}': {message}", .path.display())]
    ProjectLoad { path: PathBuf, message: String },

    #[error("project '{}' references '{}', which does not exist", .project.display(), .reference.display())]
    MissingProjectReference { project: PathBuf, reference: PathBuf },

    #[error("project reference cycle detected: {}", display_chain(.chain))]
    ProjectReferenceCycle { chain: Vec<PathBuf> },

    #[error("loading the project reference closure timed out after {}s", .timeout.as_secs())]
    ProjectClosureTimeout { timeout: Duration },

    #[error("credential provider '{provider}' timed out after {}s while acquiring credentials for '{uri}'", .timeout.as_secs())]
    CredentialTimeout {
        provider: String,
        uri: String,
        timeout: Duration,
    },

    #[error("credential provider '{provider}' failed: {message}")]
    CredentialAborted { provider: String, message: String },

    #[error("corrupted cache entry '{}': {message}", .path.display())]
    CorruptedCacheEntry { path: PathBuf, message: String },

    #[error("dependency cycle detected: {}", .ids.join(" -> "))]
    DependencyCycle { ids: Vec<String> },
}

impl RestoreError {
    /// Failures confined to one source; the aggregator moves on to the next.
    pub fn is_source_local(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Protocol { .. }
                | Self::HttpStatus { .. }
                | Self::VersionNotFound { .. }
        )
    }

    /// Transient failures worth retrying against the same url.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

fn display_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Finds a [`RestoreError`] anywhere in an error chain.
pub fn find_restore_error(err: &anyhow::Error) -> Option<&RestoreError> {
    err.chain().find_map(|cause| cause.downcast_ref::<RestoreError>())
}
