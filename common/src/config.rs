//! Process-wide configuration.
//!
//! Database parameters are read once from `MYSQL_*` environment variables at
//! startup and stay immutable for the lifetime of the process.

use std::time::Duration;

use sqlx::mysql::MySqlConnectOptions;

use crate::errors::{AppError, AppResult};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 3306;
const DEFAULT_USER: &str = "root";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// MySQL connection parameters.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Fallback database when a caller names none.
    pub default_database: String,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("default_database", &self.default_database)
            .finish()
    }
}

impl DatabaseConfig {
    /// Loads from the process environment.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("MYSQL_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| AppError::Config(format!("MYSQL_PORT 无效: {}", raw)))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: lookup("MYSQL_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            user: lookup("MYSQL_USER").unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: lookup("MYSQL_PASSWORD").unwrap_or_default(),
            default_database: lookup("MYSQL_DATABASE").unwrap_or_default(),
        })
    }

    /// Connect options for one database on the configured server.
    pub fn connect_options(&self, database: &str) -> MySqlConnectOptions {
        let database = if database.is_empty() {
            self.default_database.as_str()
        } else {
            database
        };

        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .charset("utf8mb4");
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        if !database.is_empty() {
            options = options.database(database);
        }
        options
    }
}

/// Tuning handed to the pool library.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolSettings {
    /// Loads `MYSQL_MAX_CONNECTIONS` / `MYSQL_ACQUIRE_TIMEOUT_SECS`, falling
    /// back to defaults on absent or unparsable values.
    pub fn from_env() -> Self {
        let max_connections = std::env::var("MYSQL_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let acquire_timeout_secs = std::env::var("MYSQL_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);

        Self {
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
        }
    }
}

/// Load .env file from the working directory (best-effort, no error if missing).
pub fn load_dotenv() {
    let env_path = std::path::Path::new(".env");
    let Ok(content) = std::fs::read_to_string(env_path) else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            // Only set if not already set by the environment
            if std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }
}
