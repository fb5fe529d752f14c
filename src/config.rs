// SPDX-License-Identifier: Apache-2.0

//! Service configuration
//!
//! Loaded from a JSON file; every section and field falls back to its
//! default when missing. A few settings can be overridden from the
//! environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mill_core::{MillError, MillResult};

use crate::policy::model::{validate_policies, Policy};

pub const DEFAULT_FETCH_SIZE: usize = 10_000;
pub const DEFAULT_MAX_FETCH_SIZE: usize = 100_000;
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 300;
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_LOG_FILTER: &str = "mill=info,mill_lib=info";
pub const DEFAULT_LOG_RETENTION_DAYS: u64 = 14;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub default_fetch_size: usize,
    pub max_fetch_size: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_fetch_size: DEFAULT_FETCH_SIZE,
            max_fetch_size: DEFAULT_MAX_FETCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingSettings {
    pub token_ttl_secs: u64,
    /// 0 disables the background reaper
    pub reaper_interval_secs: u64,
}

impl PagingSettings {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn reaper_interval(&self) -> Option<Duration> {
        (self.reaper_interval_secs > 0).then(|| Duration::from_secs(self.reaper_interval_secs))
    }
}

impl Default for PagingSettings {
    fn default() -> Self {
        Self {
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            reaper_interval_secs: DEFAULT_REAPER_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub enabled: bool,
    /// Authority name -> policy name
    pub authority_remap: HashMap<String, String>,
    pub policies: Vec<Policy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    pub filter: String,
    pub json: bool,
    /// Daily rolling log files are written here when set
    pub directory: Option<PathBuf>,
    pub retention_days: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
            directory: None,
            retention_days: DEFAULT_LOG_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MillConfig {
    pub execution: ExecutionSettings,
    pub paging: PagingSettings,
    pub security: SecuritySettings,
    pub logging: LoggingSettings,
}

impl MillConfig {
    /// Reads and validates a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> MillResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MillError::invalid_argument(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_json(text: &str) -> MillResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| MillError::policy_configuration(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MillResult<()> {
        let exec = &self.execution;
        if exec.max_fetch_size == 0 {
            return Err(MillError::invalid_argument("max_fetch_size must be positive"));
        }
        if exec.default_fetch_size == 0 || exec.default_fetch_size > exec.max_fetch_size {
            return Err(MillError::invalid_argument(format!(
                "default_fetch_size must be within 1..={}",
                exec.max_fetch_size
            )));
        }
        validate_policies(&self.security.policies)
    }

    /// Applies `MILL_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> MillResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> MillResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> MillResult<T> {
            value
                .trim()
                .parse()
                .map_err(|_| MillError::invalid_argument(format!("Invalid value for {key}: {value}")))
        }

        if let Some(v) = lookup("MILL_FETCH_SIZE") {
            self.execution.default_fetch_size = parse("MILL_FETCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("MILL_MAX_FETCH_SIZE") {
            self.execution.max_fetch_size = parse("MILL_MAX_FETCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("MILL_PAGING_TTL_SECS") {
            self.paging.token_ttl_secs = parse("MILL_PAGING_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("MILL_SECURITY_ENABLED") {
            self.security.enabled = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(v) = lookup("MILL_LOG") {
            self.logging.filter = v;
        }
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_sections_use_defaults() {
        let config = MillConfig::from_json(r#"{"paging": {"token_ttl_secs": 5}}"#).unwrap();
        assert_eq!(config.paging.token_ttl(), Duration::from_secs(5));
        assert_eq!(config.paging.reaper_interval_secs, DEFAULT_REAPER_INTERVAL_SECS);
        assert_eq!(config.execution, ExecutionSettings::default());
        assert!(!config.security.enabled);
    }

    #[test]
    fn loads_policies_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "security": {{
                    "enabled": true,
                    "authority_remap": {{"ROLE_ANALYST": "analyst"}},
                    "policies": [{{
                        "name": "analyst",
                        "actions": [{{"verb": "ALLOW", "type": "row-filter",
                                      "table": ["SALES", "*"], "expression": "region = 'EU'"}}]
                    }}]
                }}
            }}"#
        )
        .unwrap();
        let config = MillConfig::load(file.path()).unwrap();
        assert!(config.security.enabled);
        assert_eq!(config.security.policies.len(), 1);
        assert_eq!(config.security.authority_remap["ROLE_ANALYST"], "analyst");
    }

    #[test]
    fn bad_policy_fails_load() {
        let err = MillConfig::from_json(
            r#"{"security": {"policies": [{"name": "p", "actions": [
                {"verb": "PERMIT", "type": "row-filter", "table": ["A", "B"]}]}]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, MillError::PolicyConfiguration { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = MillConfig::default();
        let env = HashMap::from([
            ("MILL_FETCH_SIZE", "250"),
            ("MILL_SECURITY_ENABLED", "true"),
            ("MILL_LOG", "debug"),
        ]);
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.execution.default_fetch_size, 250);
        assert!(config.security.enabled);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn fetch_size_above_max_is_rejected() {
        let mut config = MillConfig::default();
        let result = config.apply_overrides(|k| (k == "MILL_FETCH_SIZE").then(|| "1000000".to_string()));
        assert!(matches!(result, Err(MillError::InvalidArgument { .. })));
    }
}
