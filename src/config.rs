use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::retention::RetentionPolicy;
use crate::retry::RetryPolicy;
use crate::worker::WorkerSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub archive_dir: PathBuf,
    pub host: IpAddr,
    pub port: u16,
    pub endpoint_url: String,
    pub auth_token: String,
    pub probe_url: Option<String>,
    pub poll_interval: Duration,
    pub delivery_timeout: Duration,
    pub error_backoff: Duration,
    pub retry: RetryPolicy,
    pub retention: RetentionPolicy,
    pub cleanup_interval: Option<Duration>,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let endpoint_url = lookup("EXPORTQ_ENDPOINT_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "Missing required environment variable: EXPORTQ_ENDPOINT_URL".to_string())?;

        let database_path = PathBuf::from(env_or(
            "EXPORTQ_DATABASE_PATH",
            "data/exports/export_queue.db",
        ));
        let archive_dir = PathBuf::from(env_or(
            "EXPORTQ_ARCHIVE_DIR",
            "data/exports/failed_exports",
        ));

        let host: IpAddr = env_or("EXPORTQ_HOST", "127.0.0.1")
            .parse()
            .map_err(|e| format!("Invalid EXPORTQ_HOST: {e}"))?;

        let port: u16 = env_or("EXPORTQ_PORT", "8094")
            .parse()
            .map_err(|e| format!("Invalid EXPORTQ_PORT: {e}"))?;

        let auth_token = env_or("EXPORTQ_AUTH_TOKEN", "unknown");
        let probe_url = lookup("EXPORTQ_PROBE_URL").filter(|s| !s.trim().is_empty());

        let poll_interval = secs(&env_or("EXPORTQ_POLL_INTERVAL_SECS", "30"), "EXPORTQ_POLL_INTERVAL_SECS")?;
        let delivery_timeout = secs(
            &env_or("EXPORTQ_DELIVERY_TIMEOUT_SECS", "30"),
            "EXPORTQ_DELIVERY_TIMEOUT_SECS",
        )?;
        let error_backoff = secs(&env_or("EXPORTQ_ERROR_BACKOFF_SECS", "60"), "EXPORTQ_ERROR_BACKOFF_SECS")?;

        let max_attempts: u32 = env_or("EXPORTQ_MAX_ATTEMPTS", "3")
            .parse()
            .map_err(|e| format!("Invalid EXPORTQ_MAX_ATTEMPTS: {e}"))?;
        if max_attempts == 0 {
            return Err("Invalid EXPORTQ_MAX_ATTEMPTS: must be at least 1".to_string());
        }

        let delays = env_or("EXPORTQ_RETRY_DELAYS_SECS", "0,300,900")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| secs(s, "EXPORTQ_RETRY_DELAYS_SECS"))
            .collect::<Result<Vec<_>, _>>()?;

        let completed_retention = days(
            &env_or("EXPORTQ_COMPLETED_RETENTION_DAYS", "30"),
            "EXPORTQ_COMPLETED_RETENTION_DAYS",
        )?;
        let failed_retention = days(
            &env_or("EXPORTQ_FAILED_RETENTION_DAYS", "7"),
            "EXPORTQ_FAILED_RETENTION_DAYS",
        )?;

        let cleanup_interval = Some(secs(
            &env_or("EXPORTQ_CLEANUP_INTERVAL_SECS", "0"),
            "EXPORTQ_CLEANUP_INTERVAL_SECS",
        )?)
        .filter(|d| !d.is_zero());

        let log_level = env_or("EXPORTQ_LOG_LEVEL", "info");

        Ok(Config {
            database_path,
            archive_dir,
            host,
            port,
            endpoint_url,
            auth_token,
            probe_url,
            poll_interval,
            delivery_timeout,
            error_backoff,
            retry: RetryPolicy {
                max_attempts,
                delays,
            },
            retention: RetentionPolicy {
                completed: completed_retention,
                failed: failed_retention,
            },
            cleanup_interval,
            log_level,
        })
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: self.poll_interval,
            delivery_timeout: self.delivery_timeout,
            error_backoff: self.error_backoff,
            default_token: self.auth_token.clone(),
        }
    }
}

fn secs(value: &str, key: &str) -> Result<Duration, String> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("Invalid {key} entry '{value}': {e}"))
}

fn days(value: &str, key: &str) -> Result<chrono::Duration, String> {
    let days: i64 = value
        .trim()
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))?;
    if days < 0 {
        return Err(format!("Invalid {key}: must not be negative"));
    }
    chrono::Duration::try_days(days).ok_or_else(|| format!("Invalid {key}: out of range"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_reference_policy() {
        let config = config_from(&[("EXPORTQ_ENDPOINT_URL", "https://cloud.example/api/v1/data/import")])
            .unwrap();

        assert_eq!(config.port, 8094);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.delivery_timeout, Duration::from_secs(30));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.retention, RetentionPolicy::default());
        assert_eq!(config.cleanup_interval, None);
        assert_eq!(config.auth_token, "unknown");
        assert!(config.probe_url.is_none());
    }

    #[test]
    fn endpoint_url_is_required() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.contains("EXPORTQ_ENDPOINT_URL"));
    }

    #[test]
    fn retry_schedule_is_parsed_from_list() {
        let config = config_from(&[
            ("EXPORTQ_ENDPOINT_URL", "http://localhost/import"),
            ("EXPORTQ_MAX_ATTEMPTS", "5"),
            ("EXPORTQ_RETRY_DELAYS_SECS", "1, 10,100"),
            ("EXPORTQ_CLEANUP_INTERVAL_SECS", "3600"),
        ])
        .unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(
            config.retry.delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(10),
                Duration::from_secs(100)
            ]
        );
        assert_eq!(config.cleanup_interval, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = config_from(&[
            ("EXPORTQ_ENDPOINT_URL", "http://localhost/import"),
            ("EXPORTQ_RETRY_DELAYS_SECS", "0,five"),
        ])
        .unwrap_err();
        assert!(err.contains("EXPORTQ_RETRY_DELAYS_SECS"));

        let err = config_from(&[
            ("EXPORTQ_ENDPOINT_URL", "http://localhost/import"),
            ("EXPORTQ_FAILED_RETENTION_DAYS", "-1"),
        ])
        .unwrap_err();
        assert!(err.contains("EXPORTQ_FAILED_RETENTION_DAYS"));

        let err = config_from(&[
            ("EXPORTQ_ENDPOINT_URL", "http://localhost/import"),
            ("EXPORTQ_MAX_ATTEMPTS", "0"),
        ])
        .unwrap_err();
        assert!(err.contains("EXPORTQ_MAX_ATTEMPTS"));
    }

    #[test]
    fn oversized_retention_is_an_error() {
        let err = config_from(&[
            ("EXPORTQ_ENDPOINT_URL", "http://localhost/import"),
            ("EXPORTQ_COMPLETED_RETENTION_DAYS", "9000000000000000"),
        ])
        .unwrap_err();
        assert_eq!(err, "Invalid EXPORTQ_COMPLETED_RETENTION_DAYS: out of range");
    }
}
