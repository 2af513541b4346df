use crate::poll::PollConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Overrides `baseUrl` from the config file
pub const BASE_URL_ENV: &str = "NLM_BASE_URL";

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_upload_url")]
    pub upload_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_health_delay")]
    pub health_call_delay_ms: u64,

    #[serde(default)]
    pub poll: PollProfiles,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            upload_url: default_upload_url(),
            request_timeout_secs: default_request_timeout(),
            health_call_delay_ms: default_health_delay(),
            poll: PollProfiles::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://notebooklm.google.com".to_string()
}

fn default_upload_url() -> String {
    "https://notebooklm.google.com/upload/_/".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_health_delay() -> u64 {
    1000
}

impl Config {
    /// Load config from file, using defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid JSON, or
    /// holds an invalid poll profile.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, "config.json");
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.base_url = url.trim().trim_end_matches('/').to_string();
        }
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] for any invalid poll profile.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("requestTimeoutSecs must be positive".into()));
        }
        self.poll.sources.to_poll_config()?;
        self.poll.generation.to_poll_config()?;
        self.poll.research.to_poll_config()?;
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn health_call_delay(&self) -> Duration {
        Duration::from_millis(self.health_call_delay_ms)
    }

    /// Home page used to derive session tokens.
    #[must_use]
    pub fn home_url(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }
}

/// Backoff profiles for the three long-running waits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollProfiles {
    #[serde(default = "PollProfile::sources")]
    pub sources: PollProfile,

    #[serde(default = "PollProfile::generation")]
    pub generation: PollProfile,

    #[serde(default = "PollProfile::research")]
    pub research: PollProfile,
}

impl Default for PollProfiles {
    fn default() -> Self {
        Self {
            sources: PollProfile::sources(),
            generation: PollProfile::generation(),
            research: PollProfile::research(),
        }
    }
}

/// One backoff schedule as written in config.json (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollProfile {
    pub initial_interval_secs: f64,
    pub max_interval_secs: f64,
    pub multiplier: f64,
    pub timeout_secs: f64,
}

impl PollProfile {
    fn sources() -> Self {
        PollConfig::SOURCES.into()
    }

    fn generation() -> Self {
        PollConfig::GENERATION.into()
    }

    fn research() -> Self {
        PollConfig::RESEARCH.into()
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] for negative or non-finite durations and
    /// anything [`PollConfig::validate`] rejects.
    pub fn to_poll_config(&self) -> Result<PollConfig> {
        let secs = |value: f64, name: &str| {
            Duration::try_from_secs_f64(value)
                .map_err(|e| Error::Config(format!("invalid poll {name} {value}: {e}")))
        };

        let config = PollConfig::new(
            secs(self.initial_interval_secs, "initialIntervalSecs")?,
            secs(self.max_interval_secs, "maxIntervalSecs")?,
            self.multiplier,
            secs(self.timeout_secs, "timeoutSecs")?,
        );
        config.validate()?;
        Ok(config)
    }
}

impl From<PollConfig> for PollProfile {
    fn from(config: PollConfig) -> Self {
        Self {
            initial_interval_secs: config.initial_interval.as_secs_f64(),
            max_interval_secs: config.max_interval.as_secs_f64(),
            multiplier: config.multiplier,
            timeout_secs: config.timeout.as_secs_f64(),
        }
    }
}
