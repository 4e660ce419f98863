//! Agent configuration.
//!
//! Settings are read from an optional TOML file, then command-line and
//! environment overrides are applied before validation produces an
//! [`AgentConfig`].

use crate::backoff::BackoffSettings;
use crate::pipeline::PipelineSettings;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Environment variable holding the access credential.
pub const CREDENTIAL_ENV: &str = "GITHUB_TOKEN";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file.
    #[error("Failed to read file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML content.
    #[error("Failed to parse config file '{path}': {source}")]
    TomlError {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// No access credential was supplied.
    #[error("No access credential provided; set GITHUB_TOKEN or pass --token")]
    MissingCredential,

    /// No monitoring root was supplied, or it does not exist.
    #[error("Monitoring root '{path}' does not exist or is not a directory")]
    MissingRoot { path: String },

    /// The API base URL is not a valid URL.
    #[error("Invalid api-base-url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A setting is out of range.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        field: &'static str,
        message: String,
    },
}

/// Access credential presented as a bearer token.
///
/// The value is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a credential, rejecting blank values.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Reads the credential from [`CREDENTIAL_ENV`].
    pub fn from_env() -> Option<Self> {
        std::env::var(CREDENTIAL_ENV).ok().and_then(Self::new)
    }

    /// Returns the raw credential.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// `[backoff]` table of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct BackoffTable {
    /// Delay after a backoff reset.
    pub base_delay_secs: u64,
    /// Upper bound for backoff delays.
    pub max_delay_secs: u64,
    /// Consecutive failures before the backoff resets.
    pub max_retries: u32,
}

impl Default for BackoffTable {
    fn default() -> Self {
        let defaults = BackoffSettings::default();
        Self {
            base_delay_secs: defaults.base_delay.as_secs(),
            max_delay_secs: defaults.max_delay.as_secs(),
            max_retries: defaults.max_retries,
        }
    }
}

/// `[pipeline]` table of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct PipelineTable {
    /// Dependency manifest looked up in each working copy.
    pub dependency_manifest: String,
    /// Per-repository installation root, relative to the working copy.
    pub environment_dir: PathBuf,
    /// Command used to restart a service; the service name is appended.
    pub restart_command: Vec<String>,
}

impl Default for PipelineTable {
    fn default() -> Self {
        let defaults = PipelineSettings::default();
        Self {
            dependency_manifest: defaults.dependency_manifest,
            environment_dir: defaults.environment_dir,
            restart_command: defaults.restart_command,
        }
    }
}

/// Raw contents of a config file. Every key is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Directory holding the checked-out repositories.
    pub root: Option<PathBuf>,
    /// GitHub API base URL.
    pub api_base_url: String,
    /// Pause between discovery cycles.
    pub cycle_interval_secs: u64,
    /// Pause after a poll that reported no change.
    pub poll_interval_secs: u64,
    /// Timeout for a single poll request.
    pub request_timeout_secs: u64,
    /// Maximum repositories polled at once.
    pub concurrency: usize,
    /// Keep cache tokens when repositories are re-discovered.
    pub preserve_token_across_discovery: bool,
    /// Directory name marking a checkout.
    pub vcs_marker: String,
    /// Backoff tunables.
    pub backoff: BackoffTable,
    /// Update pipeline settings.
    pub pipeline: PipelineTable,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            root: None,
            api_base_url: "https://api.github.com".to_string(),
            cycle_interval_secs: 60,
            poll_interval_secs: 10,
            request_timeout_secs: 10,
            concurrency: 1,
            preserve_token_across_discovery: false,
            vcs_marker: ".git".to_string(),
            backoff: BackoffTable::default(),
            pipeline: PipelineTable::default(),
        }
    }
}

impl ConfigFile {
    /// Loads a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading config file");
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError {
            path: path.display().to_string(),
            source: e,
        })
    }
}

/// Values supplied on the command line or by the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Monitoring root.
    pub root: Option<PathBuf>,
    /// Access credential; [`CREDENTIAL_ENV`] is consulted when absent.
    pub credential: Option<String>,
    /// Maximum concurrent polls.
    pub concurrency: Option<usize>,
    /// Preview updates without running them.
    pub dry_run: bool,
}

/// Validated agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    root: PathBuf,
    credential: Credential,
    api_base_url: Url,
    cycle_interval: Duration,
    poll_interval: Duration,
    request_timeout: Duration,
    concurrency: usize,
    preserve_token_across_discovery: bool,
    vcs_marker: String,
    dry_run: bool,
    backoff: BackoffSettings,
    pipeline: PipelineSettings,
}

impl AgentConfig {
    /// Merges `overrides` into `file` and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredential`] when no credential is
    /// available, and other [`ConfigError`] variants for invalid settings.
    pub fn resolve(file: ConfigFile, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let credential = overrides
            .credential
            .and_then(Credential::new)
            .or_else(Credential::from_env)
            .ok_or(ConfigError::MissingCredential)?;

        let root = overrides
            .root
            .or(file.root)
            .ok_or_else(|| ConfigError::ValidationError {
                field: "root",
                message: "no monitoring root configured".to_string(),
            })?;
        if !root.is_dir() {
            return Err(ConfigError::MissingRoot {
                path: root.display().to_string(),
            });
        }

        let api_base_url = Url::parse(&file.api_base_url).map_err(|e| ConfigError::InvalidUrl {
            url: file.api_base_url.clone(),
            source: e,
        })?;

        let concurrency = overrides.concurrency.unwrap_or(file.concurrency);
        if concurrency == 0 {
            return Err(ConfigError::ValidationError {
                field: "concurrency",
                message: "must be at least 1".to_string(),
            });
        }

        if file.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                field: "request-timeout-secs",
                message: "must be at least 1".to_string(),
            });
        }

        if file.backoff.max_delay_secs < file.backoff.base_delay_secs {
            return Err(ConfigError::ValidationError {
                field: "backoff.max-delay-secs",
                message: format!(
                    "{} is less than base-delay-secs ({})",
                    file.backoff.max_delay_secs, file.backoff.base_delay_secs
                ),
            });
        }

        let vcs_marker = file.vcs_marker.trim().to_string();
        if vcs_marker.is_empty() || vcs_marker.contains(['/', '\\']) {
            return Err(ConfigError::ValidationError {
                field: "vcs-marker",
                message: "must be a single directory name".to_string(),
            });
        }

        let pipeline = PipelineSettings {
            dependency_manifest: file.pipeline.dependency_manifest,
            environment_dir: file.pipeline.environment_dir,
            restart_command: file.pipeline.restart_command,
        };
        if pipeline.restart_command.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "pipeline.restart-command",
                message: "must name a program".to_string(),
            });
        }

        Ok(Self {
            root,
            credential,
            api_base_url,
            cycle_interval: Duration::from_secs(file.cycle_interval_secs),
            poll_interval: Duration::from_secs(file.poll_interval_secs),
            request_timeout: Duration::from_secs(file.request_timeout_secs),
            concurrency,
            preserve_token_across_discovery: file.preserve_token_across_discovery,
            vcs_marker,
            dry_run: overrides.dry_run,
            backoff: BackoffSettings {
                base_delay: Duration::from_secs(file.backoff.base_delay_secs),
                max_delay: Duration::from_secs(file.backoff.max_delay_secs),
                max_retries: file.backoff.max_retries,
            },
            pipeline,
        })
    }

    /// Loads the config file at `path` (if any) and resolves it with `overrides`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is invalid or validation fails.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        Self::resolve(file, overrides)
    }

    /// Overrides the backoff tunables.
    pub fn with_backoff(mut self, backoff: BackoffSettings) -> Self {
        self.backoff = backoff;
        self
    }

    /// Overrides both pacing intervals.
    pub fn with_intervals(mut self, cycle_interval: Duration, poll_interval: Duration) -> Self {
        self.cycle_interval = cycle_interval;
        self.poll_interval = poll_interval;
        self
    }

    /// Returns the monitoring root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the access credential.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Returns the API base URL.
    pub fn api_base_url(&self) -> &Url {
        &self.api_base_url
    }

    /// Returns the pause between discovery cycles.
    pub fn cycle_interval(&self) -> Duration {
        self.cycle_interval
    }

    /// Returns the pause after a poll that reported no change.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the max concurrent polls.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns whether cache tokens survive re-discovery.
    pub fn preserve_token_across_discovery(&self) -> bool {
        self.preserve_token_across_discovery
    }

    /// Returns the checkout marker directory name.
    pub fn vcs_marker(&self) -> &str {
        &self.vcs_marker
    }

    /// Returns whether dry-run mode is enabled.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Returns the backoff tunables.
    pub fn backoff(&self) -> &BackoffSettings {
        &self.backoff
    }

    /// Returns the pipeline settings.
    pub fn pipeline(&self) -> &PipelineSettings {
        &self.pipeline
    }
}
