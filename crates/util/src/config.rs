use std::{env, net::SocketAddr, str::FromStr};

use thiserror::Error;

use super::{database_url, server_bind_address};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Deployment flavour; decides the log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            _ => Err(ConfigError::InvalidEnvironment(value.to_string())),
        }
    }
}

/// Connection settings for the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or(ConfigError::MaxConnections(raw))?,
            _ => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            url: database_url(),
            max_connections,
        })
    }
}

/// Runtime configuration for the dashboard service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Reads `APP_ENV`, `APP_BIND_ADDR`, `DATABASE_URL` and
    /// `DATABASE_MAX_CONNECTIONS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match env::var("APP_ENV") {
            Ok(value) => value.parse()?,
            Err(_) => Environment::Development,
        };

        Ok(Self {
            bind_addr: server_bind_address()?,
            environment,
            database: DatabaseConfig::from_env()?,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("APP_ENV must be one of 'development', 'production', or 'test' (got {0})")]
    InvalidEnvironment(String),
    #[error("invalid APP_BIND_ADDR value: {0}")]
    BindAddress(#[from] std::net::AddrParseError),
    #[error("DATABASE_MAX_CONNECTIONS must be a positive integer (got {0})")]
    MaxConnections(String),
}
