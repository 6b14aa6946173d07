//! Worker process configuration, read from the environment.
//!
//! Missing platform credentials or backend URL are fatal before any claim
//! is attempted; everything else has a production default.

use std::time::Duration;

use shade_core::WorkerId;

/// Default per-process session cap.
pub const MAX_ACTIVE: usize = 20;
/// Default sleep between claim cycles.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default sleep when at capacity or nothing was claimed.
pub const IDLE_SLEEP: Duration = Duration::from_secs(8);
/// Default sleep after a supervisor-loop failure.
pub const ERROR_SLEEP: Duration = Duration::from_secs(10);
/// Default lease self-report interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// Default out-of-band authorization check interval.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(25);
/// Default trigger-list cache lifetime.
pub const TRIGGER_CACHE_TTL: Duration = Duration::from_secs(10);
/// Default lower bound of the humanized reply delay.
pub const REPLY_DELAY_MIN: Duration = Duration::from_millis(5_000);
/// Default upper bound of the humanized reply delay.
pub const REPLY_DELAY_MAX: Duration = Duration::from_millis(10_000);

/// Configuration errors are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable was not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable was set but did not parse.
    #[error("invalid value for {name}: {value}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// The reply-delay bounds are inverted.
    #[error("REPLY_DELAY_MIN_MS must not exceed REPLY_DELAY_MAX_MS")]
    InvertedReplyDelay,
}

/// Runtime configuration of a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Opaque per-process id, generated when unset.
    pub worker_id: WorkerId,
    /// Per-process session cap.
    pub max_active: usize,
    /// Sleep between claim cycles.
    pub poll_interval: Duration,
    /// Sleep when at capacity or nothing was claimed.
    pub idle_sleep: Duration,
    /// Sleep after a supervisor-loop failure.
    pub error_sleep: Duration,
    /// Lease self-report interval.
    pub heartbeat_interval: Duration,
    /// Authorization probe interval.
    pub probe_interval: Duration,
    /// Trigger-list cache lifetime.
    pub trigger_cache_ttl: Duration,
    /// Lower bound of the humanized reply delay.
    pub reply_delay_min: Duration,
    /// Upper bound of the humanized reply delay.
    pub reply_delay_max: Duration,
    /// Registry endpoint.
    pub backend_url: String,
    /// Chat-platform application id.
    pub api_id: i64,
    /// Chat-platform application hash.
    pub api_hash: String,
}

impl WorkerConfig {
    /// Read configuration from the environment, filling defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `BACKEND_URL`, `TELEGRAM_API_ID`, or
    /// `TELEGRAM_API_HASH` is absent, or any set variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            worker_id: std::env::var("WORKER_ID")
                .map_or_else(|_| WorkerId::generate(), WorkerId::new),
            max_active: env_parse("MAX_ACTIVE", MAX_ACTIVE)?,
            poll_interval: env_secs("POLL_INTERVAL", POLL_INTERVAL)?,
            idle_sleep: env_secs("IDLE_SLEEP", IDLE_SLEEP)?,
            error_sleep: env_secs("ERROR_SLEEP", ERROR_SLEEP)?,
            heartbeat_interval: env_secs("HEARTBEAT_INTERVAL", HEARTBEAT_INTERVAL)?,
            probe_interval: env_secs("PROBE_INTERVAL", PROBE_INTERVAL)?,
            trigger_cache_ttl: env_secs("TRIGGER_CACHE_TTL", TRIGGER_CACHE_TTL)?,
            reply_delay_min: env_millis("REPLY_DELAY_MIN_MS", REPLY_DELAY_MIN)?,
            reply_delay_max: env_millis("REPLY_DELAY_MAX_MS", REPLY_DELAY_MAX)?,
            backend_url: env_required("BACKEND_URL")?,
            api_id: env_parse_required("TELEGRAM_API_ID")?,
            api_hash: env_required("TELEGRAM_API_HASH")?,
        };
        if config.reply_delay_min > config.reply_delay_max {
            return Err(ConfigError::InvertedReplyDelay);
        }
        Ok(config)
    }
}

fn env_required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn env_parse_required<T: std::str::FromStr>(name: &'static str) -> Result<T, ConfigError> {
    let raw = env_required(name)?;
    raw.parse()
        .map_err(|_| ConfigError::Invalid { name, value: raw })
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn env_millis(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}
