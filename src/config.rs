//! Configuration loaded from `jobs.toml`.
//!
//! [`JobsConfig`] holds the builder defaults and the log filter. Keys missing
//! from the file fall back to sensible defaults. The `JOBS_LOG` environment
//! variable takes precedence over the file's `log_filter`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::spec::{DEFAULT_TITLE, JobKind};

/// Default file looked up in the working directory.
pub const CONFIG_FILE: &str = "jobs.toml";

/// Environment variable overriding [`JobsConfig::log_filter`].
pub const LOG_ENV: &str = "JOBS_LOG";

/// Decides when a finished job counts as watched by the user.
///
/// A job in the interactive foreground gets its feedback immediately; any
/// other job defers it behind a follow-up action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForegroundPolicy {
    /// Foreground whenever the service shows the job in a modal view.
    #[default]
    InDialog,
    /// Only user jobs shown in a modal view are in the foreground.
    UserJobsInDialog,
    /// Never foreground; feedback is deferred unless requested immediately.
    Never,
}

impl ForegroundPolicy {
    pub fn is_foreground(self, in_dialog: bool, kind: JobKind) -> bool {
        match self {
            ForegroundPolicy::InDialog => in_dialog,
            ForegroundPolicy::UserJobsInDialog => in_dialog && kind == JobKind::User,
            ForegroundPolicy::Never => false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Title given to jobs whose builder never sets one.
    #[serde(default = "default_title")]
    pub default_title: String,

    #[serde(default)]
    pub foreground_policy: ForegroundPolicy,

    /// `tracing` filter directive, e.g. `"info"` or `"jobs_builder=debug"`.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_title: default_title(),
            foreground_policy: ForegroundPolicy::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl JobsConfig {
    /// Loads `jobs.toml` from the working directory, or defaults if it is absent.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let config = if path.exists() {
            Self::read(path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    /// Loads the given file. A missing file is an error here.
    pub fn load_from(path: &Path) -> Result<Self> {
        Ok(Self::read(path)?.with_env_overrides())
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str::<JobsConfig>(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.default_title.trim().is_empty() {
            return Err(crate::error::JobError::Config(
                "default_title must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    fn with_env_overrides(self) -> Self {
        self.with_log_override(std::env::var(LOG_ENV).ok())
    }

    fn with_log_override(mut self, filter: Option<String>) -> Self {
        if let Some(filter) = filter
            && !filter.trim().is_empty()
        {
            self.log_filter = filter;
        }
        self
    }
}
