use thiserror::Error;

use std::env;
use std::net::SocketAddr;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:1999";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("LISTEN_ADDR `{0}` is not a valid socket address")]
    ListenAddr(String),
    #[error("DATABASE_MAX_CONNECTIONS `{0}` is not a positive number")]
    MaxConnections(String),
}

/**
 * Runtime configuration, read from the environment (and `.env` if present)
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub listen: SocketAddr,
    /**
     * Where rooms keep their polls, without one nothing outlives the process
     */
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen = lookup("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::ListenAddr(listen.clone()))?;

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(value) => match value.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::MaxConnections(value)),
            },
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            listen,
            database_url,
            max_connections,
        })
    }
}
