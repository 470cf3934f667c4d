// src/config.rs
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::batch::BatchSettings;
use crate::error::ConfigError;
use crate::policy::CompliancePolicy;
use crate::retry::RetryPolicy;

pub const ENV_PREFIX: &str = "TIMESHEET_";

fn default_base_url() -> String {
    "https://jira.visma.com".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./timesheet_checkpoints")
}
fn default_concurrency_limit() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_backoff_max_ms() -> u64 {
    10_000
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_max_daily_hours() -> Decimal {
    Decimal::from(10)
}
fn default_submission_deadline_offset_days() -> i64 {
    1
}

/// Engine settings, read from `TIMESHEET_*` environment variables (and `.env`).
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token for the Tempo API. Only the HTTP client needs it.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Mirror cached responses to this directory when set.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_max_daily_hours")]
    pub max_daily_hours: Decimal,
    #[serde(default = "default_submission_deadline_offset_days")]
    pub submission_deadline_offset_days: i64,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();
        let config = envy::prefixed(ENV_PREFIX).from_env::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Same as `from_env` but reads the given pairs instead of the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX).from_iter::<_, EngineConfig>(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "call_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff_max_ms ({}) is below backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        if self.max_daily_hours <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "max_daily_hours must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            jitter: true,
        }
    }

    pub fn policy(&self) -> CompliancePolicy {
        CompliancePolicy {
            max_daily_hours: self.max_daily_hours,
            submission_deadline_offset_days: self.submission_deadline_offset_days,
            ..CompliancePolicy::default()
        }
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            concurrency_limit: self.concurrency_limit,
            retry: self.retry_policy(),
            call_timeout: self.call_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = EngineConfig::from_vars(Vec::new()).unwrap();
        assert_eq!(config.base_url, "https://jira.visma.com");
        assert_eq!(config.api_token, None);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.concurrency_limit, 4);
        assert_eq!(config.retry_policy().max_retries, 3);
        assert_eq!(config.policy(), CompliancePolicy::default());
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let config = EngineConfig::from_vars(vars(&[
            ("TIMESHEET_API_TOKEN", "secret"),
            ("TIMESHEET_CONCURRENCY_LIMIT", "8"),
            ("TIMESHEET_MAX_DAILY_HOURS", "12.5"),
            ("TIMESHEET_CACHE_DIR", "/tmp/tempo-cache"),
            ("UNRELATED_CONCURRENCY_LIMIT", "99"),
        ]))
        .unwrap();
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.batch_settings().concurrency_limit, 8);
        assert_eq!(config.policy().max_daily_hours, dec!(12.5));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/tempo-cache")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_vars(vars(&[("TIMESHEET_CONCURRENCY_LIMIT", "0")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_vars(vars(&[("TIMESHEET_CALL_TIMEOUT_SECS", "0")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_vars(vars(&[("TIMESHEET_MAX_RETRIES", "many")])),
            Err(ConfigError::Env(_))
        ));
    }
}
