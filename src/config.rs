// Runtime configuration

//! Settings are layered: built-in defaults, then an optional
//! `process-desk.{toml,yaml,json}` file, then `PROCESS_DESK__*` environment
//! variables (for example `PROCESS_DESK__CONCURRENCY=version_checked`).

use ::config::builder::DefaultState;
use ::config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};

use crate::engine::instance_store::DEFAULT_PAGE_SIZE;
use crate::Result;

/// How same-field concurrent writes are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// The write the store observes last wins
    #[default]
    LastWriteWins,
    /// Updates carry the version they were computed from; stale ones are a `Conflict`
    VersionChecked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessDeskConfig {
    /// `tracing_subscriber` filter used when `RUST_LOG` is unset
    pub log_filter: String,
    pub concurrency: ConcurrencyMode,
    /// Page size for instance scans
    pub page_size: usize,
    /// Broadcast buffer of the in-process event bus
    pub notification_buffer: usize,
}

impl Default for ProcessDeskConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            concurrency: ConcurrencyMode::LastWriteWins,
            page_size: DEFAULT_PAGE_SIZE,
            notification_buffer: 1024,
        }
    }
}

impl ProcessDeskConfig {
    /// Defaults, `process-desk.*` in the working directory if present, then the environment
    pub fn load() -> Result<Self> {
        let config = Self::defaults()?
            .add_source(File::with_name("process-desk").required(false))
            .add_source(Self::environment())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Like [`ProcessDeskConfig::load`] but with an explicit, required file
    pub fn from_file(path: &str) -> Result<Self> {
        let config = Self::defaults()?
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder().add_source(Config::try_from(&ProcessDeskConfig::default())?))
    }

    fn environment() -> Environment {
        Environment::with_prefix("PROCESS_DESK")
            .separator("__")
            .try_parsing(true)
    }
}
