//! Evaluation configuration
//!
//! Values are layered: defaults, then an optional JSON file, then the
//! environment (`OPENAI_MODEL`, `OPENAI_BASE_URL`, `NL2SQL_DATABASE_ROOT`),
//! then whatever the CLI sets on top. The API key is only ever read from
//! `OPENAI_API_KEY`.

use crate::candidate::GeneratorSettings;
use crate::db::DatabaseLocator;
use crate::equivalence::RowOrderPolicy;
use crate::error::{EvalError, Result};
use crate::throttle::RequestThrottle;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const MODEL_VAR: &str = "OPENAI_MODEL";
pub const BASE_URL_VAR: &str = "OPENAI_BASE_URL";
pub const DATABASE_ROOT_VAR: &str = "NL2SQL_DATABASE_ROOT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Directory holding `<db_id>/<db_id>.<ext>` reference databases
    pub database_root: PathBuf,
    pub database_extension: String,
    pub candidate_count: usize,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub generation_timeout_secs: u64,
    pub query_timeout_secs: u64,
    /// Rows processed concurrently; 1 keeps processing sequential
    pub max_workers: usize,
    pub max_concurrent_requests: usize,
    pub min_request_interval_ms: u64,
    pub row_order: RowOrderPolicy,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            database_root: PathBuf::from("database"),
            database_extension: "sqlite".to_string(),
            candidate_count: 3,
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 500,
            temperature: None,
            generation_timeout_secs: 60,
            query_timeout_secs: 30,
            max_workers: 1,
            max_concurrent_requests: 2,
            min_request_interval_ms: 0,
            row_order: RowOrderPolicy::Strict,
        }
    }
}

impl EvalConfig {
    /// Defaults overlaid with `path` (if given) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EvalError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: EvalConfig = serde_json::from_str(&content)
            .map_err(|e| EvalError::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Overlay environment values. `lookup` is `std::env::var` in practice.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(model) = non_empty(MODEL_VAR) {
            self.model = model;
        }
        if let Some(base_url) = non_empty(BASE_URL_VAR) {
            self.base_url = base_url;
        }
        if let Some(root) = non_empty(DATABASE_ROOT_VAR) {
            self.database_root = PathBuf::from(root);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.candidate_count == 0 {
            return Err(EvalError::Config("candidate_count must be at least 1".to_string()));
        }
        if self.max_workers == 0 {
            return Err(EvalError::Config("max_workers must be at least 1".to_string()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(EvalError::Config(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.generation_timeout_secs == 0 || self.query_timeout_secs == 0 {
            return Err(EvalError::Config("timeouts must be greater than zero".to_string()));
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(EvalError::Config(format!(
                    "temperature {} is outside 0.0..=2.0",
                    temperature
                )));
            }
        }
        Ok(())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn generator_settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.generation_timeout(),
        }
    }

    pub fn throttle(&self) -> RequestThrottle {
        RequestThrottle::new(
            self.max_concurrent_requests,
            Duration::from_millis(self.min_request_interval_ms),
        )
    }

    pub fn locator(&self) -> DatabaseLocator {
        DatabaseLocator::new(&self.database_root, &self.database_extension)
    }
}

/// The generation-service key from the environment
pub fn api_key_from_env() -> Result<String> {
    std::env::var(API_KEY_VAR)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| EvalError::Config(format!("{} is not set", API_KEY_VAR)))
}
