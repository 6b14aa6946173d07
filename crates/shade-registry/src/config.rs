//! Registry process configuration, read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use crate::claim;
use crate::watchdog;

/// Configuration errors are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set but did not parse.
    #[error("invalid value for {name}: {value}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Runtime configuration of the registry process.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// SQLite database URL.
    pub database_url: String,
    /// Listen address for the worker-facing surface.
    pub bind_addr: SocketAddr,
    /// Lease age beyond which claim may steal an inactive lease.
    pub stale_lease: Duration,
    /// Watchdog sweep interval.
    pub watchdog_check_every: Duration,
    /// Heartbeat age at which the watchdog frees a lease.
    pub watchdog_timeout: Duration,
    /// Plan-expiry sweep interval.
    pub plan_check_every: Duration,
}

impl RegistryConfig {
    /// Read configuration from the environment, filling defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for any set-but-unparsable variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://shade-registry.db".to_owned()),
            bind_addr: env_parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            stale_lease: env_secs("STALE_LEASE", claim::STALE_LEASE)?,
            watchdog_check_every: env_secs("WATCHDOG_CHECK_EVERY", watchdog::CHECK_EVERY)?,
            watchdog_timeout: env_secs("WATCHDOG_TIMEOUT", watchdog::TIMEOUT)?,
            plan_check_every: env_secs("PLAN_CHECK_EVERY", watchdog::PLAN_CHECK_EVERY)?,
        })
    }
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
