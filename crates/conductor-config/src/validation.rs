//! Configuration validation module.
//!
//! Collects every problem in one pass so a misconfigured deployment fails at
//! start-up with the full list rather than one error at a time.

use crate::AppConfig;
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// URL is empty or malformed.
    InvalidUrl { url_type: String, message: String },
    /// Pool size configuration is invalid (min must be <= max).
    InvalidPoolSize { min: u32, max: u32 },
    /// A duration or count that must be positive is zero.
    NonPositive { name: String },
    /// Lease TTL does not exceed the execution timeout.
    LockTtlTooShort { ttl_secs: u64, job_timeout_secs: u64 },
    /// Unacknowledged tasks could be reclaimed while still executing.
    ReclaimIdleTooShort { reclaim_idle_ms: u64, job_timeout_secs: u64 },
    /// Stale QUEUED jobs would be failed before their task can be reclaimed.
    QueuedStaleTooShort { queued_stale_secs: u64, reclaim_idle_ms: u64 },
    /// Heartbeat key would expire between refreshes.
    HeartbeatTtlTooShort { ttl_secs: u64, interval_secs: u64 },
    /// Initial backoff is larger than the cap.
    InvalidBackoff { initial_ms: u64, max_ms: u64 },
    /// Worker id is empty.
    MissingWorkerId,
    /// Log level is invalid.
    InvalidLogLevel { value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {url_type} URL: {message}")
            }
            Self::InvalidPoolSize { min, max } => {
                write!(
                    f,
                    "Invalid pool size: min ({min}) cannot be greater than max ({max})"
                )
            }
            Self::NonPositive { name } => write!(f, "'{name}' must be positive"),
            Self::LockTtlTooShort {
                ttl_secs,
                job_timeout_secs,
            } => write!(
                f,
                "lock.ttl_secs ({ttl_secs}) must exceed worker.job_timeout_secs ({job_timeout_secs})"
            ),
            Self::ReclaimIdleTooShort {
                reclaim_idle_ms,
                job_timeout_secs,
            } => write!(
                f,
                "queue.reclaim_idle_ms ({reclaim_idle_ms}) must exceed worker.job_timeout_secs ({job_timeout_secs}) in milliseconds"
            ),
            Self::QueuedStaleTooShort {
                queued_stale_secs,
                reclaim_idle_ms,
            } => write!(
                f,
                "recovery.queued_stale_secs ({queued_stale_secs}) must exceed queue.reclaim_idle_ms ({reclaim_idle_ms}) in seconds"
            ),
            Self::HeartbeatTtlTooShort {
                ttl_secs,
                interval_secs,
            } => write!(
                f,
                "worker.heartbeat_ttl_secs ({ttl_secs}) must exceed worker.heartbeat_interval_secs ({interval_secs})"
            ),
            Self::InvalidBackoff { initial_ms, max_ms } => write!(
                f,
                "retry.initial_backoff_ms ({initial_ms}) cannot be greater than retry.max_backoff_ms ({max_ms})"
            ),
            Self::MissingWorkerId => write!(f, "worker.id cannot be empty"),
            Self::InvalidLogLevel { value } => write!(
                f,
                "Invalid log level: '{value}' (valid: trace, debug, info, warn, error)"
            ),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Valid log levels.
    const VALID_LOG_LEVELS: &'static [&'static str] = &["trace", "debug", "info", "warn", "error"];

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_database(config, &mut errors);
        Self::validate_redis(config, &mut errors);
        Self::validate_loops(config, &mut errors);
        Self::validate_worker(config, &mut errors);
        Self::validate_observability(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_database(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let database = &config.database;
        if database.url.is_empty() {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "database".to_string(),
                message: "URL cannot be empty".to_string(),
            });
        } else if !database.url.starts_with("mysql://") {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "database".to_string(),
                message: "URL must start with mysql://".to_string(),
            });
        }

        if database.min_connections > database.max_connections {
            errors.push(ConfigValidationError::InvalidPoolSize {
                min: database.min_connections,
                max: database.max_connections,
            });
        }
    }

    fn validate_redis(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let redis = &config.redis;
        if redis.url.is_empty() {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: "URL cannot be empty".to_string(),
            });
            return;
        }

        match Url::parse(&redis.url) {
            Ok(url) if matches!(url.scheme(), "redis" | "rediss") => {}
            Ok(_) => errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: "URL must start with redis:// or rediss://".to_string(),
            }),
            Err(e) => errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: e.to_string(),
            }),
        }

        if redis.pool_size == 0 {
            errors.push(non_positive("redis.pool_size"));
        }
    }

    fn validate_loops(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let checks = [
            ("scheduler.interval_ms", config.scheduler.interval_ms),
            ("scheduler.batch_size", u64::from(config.scheduler.batch_size)),
            ("retry.interval_ms", config.retry.interval_ms),
            ("retry.dead_letter_interval_ms", config.retry.dead_letter_interval_ms),
            ("retry.batch_size", u64::from(config.retry.batch_size)),
            ("retry.initial_backoff_ms", config.retry.initial_backoff_ms),
            ("recovery.interval_ms", config.recovery.interval_ms),
            ("recovery.batch_size", u64::from(config.recovery.batch_size)),
            ("queue.partitions", u64::from(config.queue.partitions)),
            ("queue.publish_timeout_ms", config.queue.publish_timeout_ms),
        ];
        for (name, value) in checks {
            if value == 0 {
                errors.push(non_positive(name));
            }
        }

        if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
            errors.push(ConfigValidationError::InvalidBackoff {
                initial_ms: config.retry.initial_backoff_ms,
                max_ms: config.retry.max_backoff_ms,
            });
        }
    }

    fn validate_worker(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let worker = &config.worker;
        if worker.id.trim().is_empty() {
            errors.push(ConfigValidationError::MissingWorkerId);
        }
        if worker.concurrency == 0 {
            errors.push(non_positive("worker.concurrency"));
        }
        if worker.job_timeout_secs == 0 {
            errors.push(non_positive("worker.job_timeout_secs"));
        }
        if worker.heartbeat_interval_secs == 0 {
            errors.push(non_positive("worker.heartbeat_interval_secs"));
        }
        if worker.heartbeat_ttl_secs <= worker.heartbeat_interval_secs {
            errors.push(ConfigValidationError::HeartbeatTtlTooShort {
                ttl_secs: worker.heartbeat_ttl_secs,
                interval_secs: worker.heartbeat_interval_secs,
            });
        }
        if config.lock.ttl_secs <= worker.job_timeout_secs {
            errors.push(ConfigValidationError::LockTtlTooShort {
                ttl_secs: config.lock.ttl_secs,
                job_timeout_secs: worker.job_timeout_secs,
            });
        }
        if config.queue.reclaim_idle_ms <= worker.job_timeout_secs.saturating_mul(1_000) {
            errors.push(ConfigValidationError::ReclaimIdleTooShort {
                reclaim_idle_ms: config.queue.reclaim_idle_ms,
                job_timeout_secs: worker.job_timeout_secs,
            });
        }
        if config.recovery.queued_stale_secs.saturating_mul(1_000) <= config.queue.reclaim_idle_ms {
            errors.push(ConfigValidationError::QueuedStaleTooShort {
                queued_stale_secs: config.recovery.queued_stale_secs,
                reclaim_idle_ms: config.queue.reclaim_idle_ms,
            });
        }
    }

    fn validate_observability(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let level = config.observability.log_level.to_lowercase();
        if !Self::VALID_LOG_LEVELS.contains(&level.as_str()) {
            errors.push(ConfigValidationError::InvalidLogLevel {
                value: config.observability.log_level.clone(),
            });
        }
    }
}

fn non_positive(name: &str) -> ConfigValidationError {
    ConfigValidationError::NonPositive {
        name: name.to_string(),
    }
}
