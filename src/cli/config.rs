//! Run configuration file
//!
//! ```json
//! {
//!   "jobs": [
//!     {
//!       "template": "templates/binance_trades.json",
//!       "bindings": {"limit": 500},
//!       "pairs": ["BTC-USDT", "ETH-USDT"],
//!       "credentials": {"api_key_env": "BINANCE_KEY", "secret_env": "BINANCE_SECRET"}
//!     }
//!   ],
//!   "options": {"poll_interval_ms": 60000, "max_retries": 5, "run_once": false},
//!   "export": {"template": "templates/trades_csv.json", "output": "out/trades.csv"}
//! }
//! ```
//!
//! Relative paths are resolved against the directory of the configuration file.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::CliError;
use crate::collector::CollectorOptions;
use crate::fetcher::auth::Credentials;
use crate::template::CurrencyPair;

/// Top-level run configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// One job per exchange
    pub jobs: Vec<JobConfig>,
    /// Runtime option overrides
    #[serde(default)]
    pub options: OptionsConfig,
    /// Export performed after collection stops
    #[serde(default)]
    pub export: Option<ExportConfig>,
}

/// One collection job
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Request template file
    pub template: PathBuf,
    /// Parameter values
    #[serde(default)]
    pub bindings: Map<String, Value>,
    /// Pairs collected in turn, spelled through the template's `pair_format`
    #[serde(default)]
    pub pairs: Vec<CurrencyPair>,
    /// Names of the environment variables holding credentials
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Credential sources; secrets never live in the configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    /// Variable holding the API key
    pub api_key_env: Option<String>,
    /// Variable holding the signing secret
    pub secret_env: Option<String>,
}

impl CredentialsConfig {
    /// Read the credentials from the environment
    pub fn resolve(&self) -> Credentials {
        Credentials::from_env(self.api_key_env.as_deref(), self.secret_env.as_deref())
    }
}

/// Overrides of [`CollectorOptions`]; unset fields keep the defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionsConfig {
    /// Pause between cycles
    pub poll_interval_ms: Option<u64>,
    /// Retries per page
    pub max_retries: Option<u32>,
    /// First backoff delay
    pub initial_backoff_ms: Option<u64>,
    /// Backoff cap
    pub max_backoff_ms: Option<u64>,
    /// Consecutive failures tolerated per exchange
    pub max_consecutive_failures: Option<u32>,
    /// Default request timeout
    pub request_timeout_ms: Option<u64>,
    /// Global cap on in-flight requests
    pub max_concurrent_requests: Option<usize>,
    /// Stop after one cycle
    #[serde(default)]
    pub run_once: bool,
}

impl OptionsConfig {
    /// Build collector options from the defaults and these overrides
    pub fn to_options(&self) -> CollectorOptions {
        let mut options = CollectorOptions::default();
        if let Some(ms) = self.poll_interval_ms {
            options = options.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(retries) = self.max_retries {
            options = options.with_max_retries(retries);
        }
        if self.initial_backoff_ms.is_some() || self.max_backoff_ms.is_some() {
            let initial = self
                .initial_backoff_ms
                .map_or(options.initial_backoff, Duration::from_millis);
            let max = self.max_backoff_ms.map_or(options.max_backoff, Duration::from_millis);
            options = options.with_backoff(initial, max);
        }
        if let Some(threshold) = self.max_consecutive_failures {
            options = options.with_max_consecutive_failures(threshold);
        }
        if let Some(ms) = self.request_timeout_ms {
            options = options.with_request_timeout(Duration::from_millis(ms));
        }
        if let Some(limit) = self.max_concurrent_requests {
            options = options.with_max_concurrent_requests(limit);
        }
        if self.run_once {
            options = options.run_once();
        }
        options
    }
}

/// Export after collection
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    /// Export template file
    pub template: PathBuf,
    /// Output file
    pub output: PathBuf,
}

impl RunConfig {
    /// Load a configuration file and resolve its relative paths
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CliError::ConfigurationError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: RunConfig = serde_json::from_str(&text).map_err(|e| {
            CliError::ConfigurationError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        if config.jobs.is_empty() {
            return Err(CliError::ConfigurationError(format!(
                "{} declares no jobs",
                path.display()
            )));
        }

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for job in &mut config.jobs {
            job.template = resolve(base, &job.template);
        }
        if let Some(export) = &mut config.export {
            export.template = resolve(base, &export.template);
            export.output = resolve(base, &export.output);
        }
        Ok(config)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Read a JSON document from disk
pub fn load_document(path: &Path) -> Result<Value, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CliError::ConfigurationError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        CliError::ConfigurationError(format!("Failed to parse {}: {}", path.display(), e))
    })
}
