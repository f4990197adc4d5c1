use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_DATABASE_URL: &str = "sqlite:trusty_poll.db";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2000;
const DEFAULT_AUDIT_INTERVAL_SECONDS: u64 = 300;

/// Runtime settings, read from the environment (and `.env` via dotenvy in main).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
    /// Longest wait for a poll lock, SQLite's file lock or a pooled connection.
    pub lock_timeout: Duration,
    pub admin_code: Option<String>,
    /// `None` disables the background auditor.
    pub audit_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let max_connections: u32 = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "DATABASE_MAX_CONNECTIONS",
                reason: "must be at least 1".to_string(),
            });
        }

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr.parse().map_err(|e| ConfigError::Invalid {
            var: "BIND_ADDR",
            reason: format!("{}", e),
        })?;

        let lock_timeout_ms: u64 = parse_or(&lookup, "LOCK_TIMEOUT_MS", DEFAULT_LOCK_TIMEOUT_MS)?;
        if lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "LOCK_TIMEOUT_MS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let admin_code = lookup("ADMIN_CODE").filter(|code| !code.trim().is_empty());

        let audit_secs: u64 = parse_or(&lookup, "AUDIT_INTERVAL_SECONDS", DEFAULT_AUDIT_INTERVAL_SECONDS)?;
        let audit_interval = (audit_secs > 0).then(|| Duration::from_secs(audit_secs));

        Ok(Self {
            database_url,
            max_connections,
            bind_addr,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            admin_code,
            audit_interval,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
