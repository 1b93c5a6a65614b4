use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use draw_core::{SolverConfig, Strategy, DEFAULT_MAX_ATTEMPTS};

pub const DEFAULT_MIN_PARTICIPANTS: usize = 3;

/// Service settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub admin_password: String,
    /// JSON snapshot of all groups; in-memory only when unset.
    pub persist_path: Option<PathBuf>,
    /// Smallest group that may be drawn.
    pub min_participants: usize,
    pub solver: SolverConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            admin_password: "changeme".to_string(),
            persist_path: None,
            min_participants: DEFAULT_MIN_PARTICIPANTS,
            solver: SolverConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {name}: {reason}")]
pub struct ConfigError {
    name: &'static str,
    value: String,
    reason: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            bind_addr: parsed("BIND_ADDR", defaults.bind_addr)?,
            admin_password: env::var("ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
            persist_path: env::var_os("PERSIST_PATH").map(PathBuf::from),
            min_participants: parsed("MIN_PARTICIPANTS", defaults.min_participants)?,
            solver: SolverConfig {
                max_attempts: parsed("DRAW_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
                strategy: parsed("DRAW_STRATEGY", Strategy::default())?,
            },
        };
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.min_participants < 2 {
            return Err(ConfigError {
                name: "MIN_PARTICIPANTS",
                value: self.min_participants.to_string(),
                reason: "a draw needs at least two participants".to_string(),
            });
        }
        if self.solver.max_attempts < 1 {
            return Err(ConfigError {
                name: "DRAW_MAX_ATTEMPTS",
                value: self.solver.max_attempts.to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        Ok(self)
    }
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value.parse().map_err(|err: T::Err| ConfigError {
            name,
            reason: err.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}
