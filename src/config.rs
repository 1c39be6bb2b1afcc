//! Configuration - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::state::RaceConfig;

/// Server configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Default tracing filter (trace, debug, info, warn, error or a directive list).
    pub log_filter: String,
    /// Seed of the ship colour generator.
    pub color_seed: u64,
    /// Race rules.
    pub race: RaceConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 256,
            log_filter: "info".to_string(),
            color_seed: 0,
            race: RaceConfig::default(),
            version: crate::VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Variable               | Meaning                             |
    /// |------------------------|-------------------------------------|
    /// | `PORT`                 | Port on 0.0.0.0, wins over the addr |
    /// | `HOVER_RACE_ADDR`      | Full bind address                   |
    /// | `HOVER_RACE_LOG`       | Default tracing filter              |
    /// | `HOVER_RACE_SEED`      | Ship colour seed                    |
    /// | `HOVER_RACE_MAX_SHIPS` | Ships per race                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind_addr = match (lookup("PORT"), lookup("HOVER_RACE_ADDR")) {
            (Some(port), _) => format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(port))?,
            (None, Some(addr)) => addr.parse().map_err(|_| ConfigError::InvalidAddress(addr))?,
            (None, None) => defaults.bind_addr,
        };

        let color_seed = parse_var(&lookup, "HOVER_RACE_SEED")?.unwrap_or(defaults.color_seed);

        let mut race = defaults.race;
        if let Some(max_ships) = parse_var::<usize, _>(&lookup, "HOVER_RACE_MAX_SHIPS")? {
            if max_ships == 0 {
                return Err(ConfigError::InvalidNumber {
                    key: "HOVER_RACE_MAX_SHIPS",
                    value: "0".into(),
                });
            }
            race.max_ships = max_ships;
        }

        Ok(Self {
            bind_addr,
            log_filter: lookup("HOVER_RACE_LOG").unwrap_or(defaults.log_filter),
            color_seed,
            race,
            ..defaults
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { key, value })
        })
        .transpose()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Bind address does not parse.
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    /// Numeric variable does not parse.
    #[error("Invalid value for {key}: {value}")]
    InvalidNumber {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
}
