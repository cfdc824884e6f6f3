//! Configuration module
//!
//! Reads the pipeline's settings from the environment (with `.env` support). Numeric
//! settings never abort startup: an unparseable value is logged and replaced by its
//! default. Retention is opt-in, so an absent, empty or invalid retention value
//! disables the sweeper.

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::REQUIRED_STREAMS;

// Common constants
pub const DEFAULT_WORKER_THREADS: usize = 3;
const PUBLISH_INTERVAL_SECS: u64 = 300;
const CLEANUP_INTERVAL_SECS: u64 = 86_400;
pub const DEFAULT_FILE_DEADLINE_SECS: u64 = 600;
pub const DEFAULT_MAX_FILE_ATTEMPTS: u32 = 5;
const RETRY_BASE_SECS: u64 = 60;
const RETRY_MAX_SECS: u64 = 6 * 3600;
/// 256 MiB
pub const DEFAULT_MAX_ARCHIVE_ENTRY_BYTES: u64 = 256 * 1024 * 1024;
const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const SINK_BUFFER: usize = 1024;

/// Where stream definitions are read from. Exactly one is active per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSourceKind {
    /// JSON definition files in a directory
    Directory,
    /// `stream_definitions` table in the pipeline database
    Registry,
}

impl FromStr for SchemaSourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "directory" | "file" => Ok(SchemaSourceKind::Directory),
            "registry" | "database" => Ok(SchemaSourceKind::Registry),
            _ => Err(anyhow::anyhow!("Invalid schema source: {}", s)),
        }
    }
}

impl Display for SchemaSourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SchemaSourceKind::Directory => write!(f, "directory"),
            SchemaSourceKind::Registry => write!(f, "registry"),
        }
    }
}

/// Backend holding uploaded-file metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid store backend: {}", s)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UsageConfig {
    /// Size of the file-processing pool; also the batch size of each publisher tick.
    pub worker_threads: usize,
    /// Processed files older than this many days are purged. `None` disables retention.
    pub file_retention_days: Option<u32>,
    pub publish_interval: Duration,
    pub cleanup_interval: Duration,
    /// Upper bound on the time one file may occupy a pool slot.
    pub file_deadline: Duration,
    /// Backoff and attempt limit for files that fail to process.
    pub retry: RetryPolicy,
    /// Largest decompressed usage entry accepted from a `.zip` upload.
    pub max_archive_entry_bytes: u64,
    pub schema_source: SchemaSourceKind,
    pub schema_dir: PathBuf,
    pub required_streams: Vec<String>,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub local_storage_path: PathBuf,
    pub sink_buffer: usize,
    pub log_format: String,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            file_retention_days: None,
            publish_interval: Duration::from_secs(PUBLISH_INTERVAL_SECS),
            cleanup_interval: Duration::from_secs(CLEANUP_INTERVAL_SECS),
            file_deadline: Duration::from_secs(DEFAULT_FILE_DEADLINE_SECS),
            retry: RetryPolicy::default(),
            max_archive_entry_bytes: DEFAULT_MAX_ARCHIVE_ENTRY_BYTES,
            schema_source: SchemaSourceKind::Directory,
            schema_dir: PathBuf::from("./stream-definitions"),
            required_streams: REQUIRED_STREAMS.iter().map(|s| s.to_string()).collect(),
            store_backend: StoreBackend::Postgres,
            database_url: None,
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            local_storage_path: PathBuf::from("./usage-uploads"),
            sink_buffer: SINK_BUFFER,
            log_format: "text".to_string(),
        }
    }
}

impl UsageConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let worker_threads = parse_or_default(&lookup, "USAGE_WORKER_THREADS", defaults.worker_threads);
        let worker_threads = if worker_threads == 0 {
            tracing::error!(
                default = DEFAULT_WORKER_THREADS,
                "USAGE_WORKER_THREADS must be greater than zero, using default"
            );
            DEFAULT_WORKER_THREADS
        } else {
            worker_threads
        };

        let deadline_secs =
            parse_or_default(&lookup, "USAGE_FILE_DEADLINE_SECS", DEFAULT_FILE_DEADLINE_SECS);
        let deadline_secs = if deadline_secs == 0 {
            tracing::error!(
                default = DEFAULT_FILE_DEADLINE_SECS,
                "USAGE_FILE_DEADLINE_SECS must be greater than zero, using default"
            );
            DEFAULT_FILE_DEADLINE_SECS
        } else {
            deadline_secs
        };

        let max_attempts =
            parse_or_default(&lookup, "USAGE_MAX_FILE_ATTEMPTS", DEFAULT_MAX_FILE_ATTEMPTS);
        let max_attempts = if max_attempts == 0 {
            tracing::error!(
                default = DEFAULT_MAX_FILE_ATTEMPTS,
                "USAGE_MAX_FILE_ATTEMPTS must be greater than zero, using default"
            );
            DEFAULT_MAX_FILE_ATTEMPTS
        } else {
            max_attempts
        };
        let retry = RetryPolicy {
            base_backoff: Duration::from_secs(parse_or_default(
                &lookup,
                "USAGE_RETRY_BASE_SECS",
                RETRY_BASE_SECS,
            )),
            max_backoff: Duration::from_secs(parse_or_default(
                &lookup,
                "USAGE_RETRY_MAX_SECS",
                RETRY_MAX_SECS,
            )),
            max_attempts,
        };

        let max_archive_entry_bytes = parse_or_default(
            &lookup,
            "USAGE_MAX_ARCHIVE_ENTRY_BYTES",
            DEFAULT_MAX_ARCHIVE_ENTRY_BYTES,
        )
        .max(1);

        let file_retention_days = match lookup("USAGE_FILE_RETENTION_DAYS")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            None => None,
            Some(raw) => match raw.parse::<u32>() {
                Ok(days) => Some(days),
                Err(e) => {
                    tracing::error!(
                        value = %raw,
                        error = %e,
                        "USAGE_FILE_RETENTION_DAYS is not a valid number of days, retention disabled"
                    );
                    None
                }
            },
        };

        let schema_source = match lookup("SCHEMA_SOURCE") {
            Some(raw) => raw.parse()?,
            None => defaults.schema_source,
        };

        let store_backend = match lookup("STORE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => defaults.store_backend,
        };

        let required_streams = lookup("USAGE_REQUIRED_STREAMS")
            .map(|s| {
                s.split(',')
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|keys| !keys.is_empty())
            .unwrap_or(defaults.required_streams);

        Ok(UsageConfig {
            worker_threads,
            file_retention_days,
            publish_interval: Duration::from_secs(parse_or_default(
                &lookup,
                "USAGE_PUBLISH_INTERVAL_SECS",
                PUBLISH_INTERVAL_SECS,
            )),
            cleanup_interval: Duration::from_secs(parse_or_default(
                &lookup,
                "USAGE_CLEANUP_INTERVAL_SECS",
                CLEANUP_INTERVAL_SECS,
            )),
            file_deadline: Duration::from_secs(deadline_secs),
            retry,
            max_archive_entry_bytes,
            schema_source,
            schema_dir: lookup("SCHEMA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.schema_dir),
            required_streams,
            store_backend,
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            db_max_connections: parse_or_default(&lookup, "DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: parse_or_default(
                &lookup,
                "DB_TIMEOUT_SECONDS",
                CONNECTION_TIMEOUT_SECS,
            ),
            local_storage_path: lookup("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_storage_path),
            sink_buffer: parse_or_default(&lookup, "SINK_BUFFER", SINK_BUFFER).max(1),
            log_format: lookup("LOG_FORMAT")
                .map(|s| s.to_lowercase())
                .unwrap_or(defaults.log_format),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let needs_database = self.store_backend == StoreBackend::Postgres
            || self.schema_source == SchemaSourceKind::Registry;

        if needs_database {
            match self.database_url.as_deref() {
                None => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be set when using the postgres store or the registry schema source"
                    ))
                }
                Some(url) if !url.starts_with("postgres://") && !url.starts_with("postgresql://") => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string"
                    ))
                }
                Some(_) => {}
            }
        }

        if self.publish_interval.is_zero() || self.cleanup_interval.is_zero() {
            return Err(anyhow::anyhow!(
                "USAGE_PUBLISH_INTERVAL_SECS and USAGE_CLEANUP_INTERVAL_SECS must be greater than zero"
            ));
        }

        Ok(())
    }

    pub fn retention_enabled(&self) -> bool {
        self.file_retention_days.is_some()
    }
}

/// How failed files are retried.
///
/// A file that fails for a reason of its own (unreadable content, deadline) waits
/// `base_backoff * 2^attempts`, capped at `max_backoff`, before it is listed again.
/// After `max_attempts` failures it is parked as FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(RETRY_BASE_SECS),
            max_backoff: Duration::from_secs(RETRY_MAX_SECS),
            max_attempts: DEFAULT_MAX_FILE_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try of a file that has failed `attempts` times so far.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether a file with `attempts` recorded failures has used up its tries.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Parse a numeric variable, logging and falling back to `default` when it is invalid.
fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display + Copy,
    T::Err: Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    variable = key,
                    value = %raw,
                    error = %e,
                    default = %default,
                    "Invalid configuration value, using default"
                );
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> UsageConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        UsageConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
        assert_eq!(config.file_retention_days, None);
        assert_eq!(config.required_streams.len(), 5);
        assert_eq!(config.schema_source, SchemaSourceKind::Directory);
        assert!(!config.retention_enabled());
    }

    #[test]
    fn test_non_numeric_worker_threads_falls_back_to_default() {
        let config = config_from(&[("USAGE_WORKER_THREADS", "many")]);
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
    }

    #[test]
    fn test_zero_worker_threads_falls_back_to_default() {
        let config = config_from(&[("USAGE_WORKER_THREADS", "0")]);
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
    }

    #[test]
    fn test_worker_threads_parsed() {
        let config = config_from(&[("USAGE_WORKER_THREADS", " 8 ")]);
        assert_eq!(config.worker_threads, 8);
    }

    #[test]
    fn test_zero_deadline_falls_back_to_default() {
        let config = config_from(&[("USAGE_FILE_DEADLINE_SECS", "0")]);
        assert_eq!(
            config.file_deadline,
            Duration::from_secs(DEFAULT_FILE_DEADLINE_SECS)
        );

        let config = config_from(&[("USAGE_FILE_DEADLINE_SECS", "45")]);
        assert_eq!(config.file_deadline, Duration::from_secs(45));
    }

    #[test]
    fn test_zero_max_attempts_falls_back_to_default() {
        let config = config_from(&[("USAGE_MAX_FILE_ATTEMPTS", "0")]);
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_FILE_ATTEMPTS);
    }

    #[test]
    fn test_retry_backoff_doubles_then_caps() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
            max_attempts: 3,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(2), Duration::from_secs(120));
        assert_eq!(policy.backoff(3), Duration::from_secs(240));
        assert_eq!(policy.backoff(4), Duration::from_secs(300));
        assert_eq!(policy.backoff(60), Duration::from_secs(300));
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[test]
    fn test_empty_retention_disables_sweeper() {
        let config = config_from(&[("USAGE_FILE_RETENTION_DAYS", "  ")]);
        assert_eq!(config.file_retention_days, None);
    }

    #[test]
    fn test_invalid_retention_disables_sweeper() {
        let config = config_from(&[("USAGE_FILE_RETENTION_DAYS", "two")]);
        assert_eq!(config.file_retention_days, None);
    }

    #[test]
    fn test_retention_parsed() {
        let config = config_from(&[("USAGE_FILE_RETENTION_DAYS", "2")]);
        assert_eq!(config.file_retention_days, Some(2));
        assert!(config.retention_enabled());
    }

    #[test]
    fn test_required_streams_override() {
        let config = config_from(&[("USAGE_REQUIRED_STREAMS", "a:1.0, b:1.0,,")]);
        assert_eq!(config.required_streams, vec!["a:1.0", "b:1.0"]);
    }

    #[test]
    fn test_invalid_schema_source_is_rejected() {
        let vars: HashMap<&str, &str> = [("SCHEMA_SOURCE", "ftp")].into_iter().collect();
        assert!(UsageConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).is_err());
    }

    #[test]
    fn test_validate_requires_database_url_for_postgres_store() {
        let config = config_from(&[]);
        assert!(config.validate().is_err());

        let config = config_from(&[("DATABASE_URL", "postgresql://localhost/usage")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_memory_store_with_directory_source() {
        let config = config_from(&[("STORE_BACKEND", "memory")]);
        assert!(config.validate().is_ok());

        let config = config_from(&[("STORE_BACKEND", "memory"), ("SCHEMA_SOURCE", "registry")]);
        assert!(config.validate().is_err());
    }
}
