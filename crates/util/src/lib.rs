pub mod config;

use std::{env, net::SocketAddr};

pub use config::{AppConfig, ConfigError, DatabaseConfig, Environment, DEFAULT_MAX_CONNECTIONS};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://dashboard.db?mode=rwc";

/// Loads `.env` when present; a missing file is not an error.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// `APP_BIND_ADDR`, or [`DEFAULT_BIND_ADDR`] when unset.
pub fn server_bind_address() -> Result<SocketAddr, std::net::AddrParseError> {
    let value = env::var("APP_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    value.parse()
}

/// `DATABASE_URL`, or a `dashboard.db` file in the working directory when unset or blank.
pub fn database_url() -> String {
    env::var("DATABASE_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}
