use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::RetryPolicy;

pub const DEFAULT_SOURCE_BASE_URL: &str = "http://vitibrasil.cnpuv.embrapa.br";
pub const DEFAULT_DATA_DIR: &str = "./data/vitibrasil";

/// Runtime configuration, read from the environment (after `dotenvy`).
#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: Option<String>,
    pub data_dir: PathBuf,
    pub source_base_url: String,
    pub rate_limit_ms: u64,
    pub fetch_max_attempts: u32,
    pub fetch_backoff_ms: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_workers: usize,
    pub retry_statuses: Vec<u16>,
    pub api_bind: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or unparseable numbers fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let retry_statuses = match lookup("RETRY_STATUSES") {
            Some(raw) => parse_status_list(&raw)?,
            None => vec![500, 502, 503, 504],
        };

        Ok(Self {
            db_url: lookup("DB_URL").filter(|v| !v.trim().is_empty()),
            data_dir: PathBuf::from(
                lookup("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            ),
            source_base_url: lookup("SOURCE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_SOURCE_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            rate_limit_ms: parse_or(&lookup, "RATE_LIMIT_MS", 1000),
            fetch_max_attempts: parse_or(&lookup, "FETCH_MAX_ATTEMPTS", 3).max(1),
            fetch_backoff_ms: parse_or(&lookup, "FETCH_BACKOFF_MS", 10_000),
            fetch_timeout_secs: parse_or(&lookup, "FETCH_TIMEOUT_SECS", 120),
            fetch_workers: parse_or(&lookup, "FETCH_WORKERS", 4).max(1),
            retry_statuses,
            api_bind: lookup("API_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
        })
    }

    pub fn require_db_url(&self) -> Result<&str> {
        self.db_url.as_deref().context("DB_URL env var missing")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_max_attempts,
            backoff: Duration::from_millis(self.fetch_backoff_ms),
            retry_statuses: self.retry_statuses.clone(),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_status_list(raw: &str) -> Result<Vec<u16>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .with_context(|| format!("RETRY_STATUSES: '{}' is not a status code", s))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(config.db_url.is_none());
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.source_base_url, DEFAULT_SOURCE_BASE_URL);
        assert_eq!(config.fetch_max_attempts, 3);
        assert_eq!(config.retry_statuses, vec![500, 502, 503, 504]);
        assert_eq!(config.api_bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_overrides_and_trailing_slash() {
        let config = config_from(&[
            ("DB_URL", "postgres://localhost/viti"),
            ("SOURCE_BASE_URL", "http://127.0.0.1:9000/"),
            ("FETCH_WORKERS", "8"),
            ("RETRY_STATUSES", "503, 429"),
        ])
        .unwrap();
        assert_eq!(config.require_db_url().unwrap(), "postgres://localhost/viti");
        assert_eq!(config.source_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.fetch_workers, 8);
        assert_eq!(config.retry_statuses, vec![503, 429]);
    }

    #[test]
    fn test_unparseable_numbers_fall_back() {
        let config = config_from(&[("RATE_LIMIT_MS", "soon"), ("FETCH_MAX_ATTEMPTS", "0")]).unwrap();
        assert_eq!(config.rate_limit_ms, 1000);
        // Zero attempts would never fetch anything.
        assert_eq!(config.fetch_max_attempts, 1);
    }

    #[test]
    fn test_bad_retry_status_fails() {
        assert!(config_from(&[("RETRY_STATUSES", "500,oops")]).is_err());
    }

    #[test]
    fn test_missing_db_url() {
        let config = config_from(&[("DB_URL", "  ")]).unwrap();
        assert!(config.require_db_url().is_err());
    }
}
