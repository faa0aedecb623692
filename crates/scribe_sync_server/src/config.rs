use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::sync::SyncSettings;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 127.0.0.1)
    pub host: String,
    /// Server port (default: 8080)
    pub port: u16,
    /// Database file path for users, sessions and documents (default: ./scribe.db)
    pub database_path: PathBuf,
    /// Auth session token expiration in hours (default: 72)
    pub session_expiry_hours: i64,
    /// Seconds between write-behind flushes of cached documents (default: 30)
    pub flush_interval_secs: u64,
    /// Outbound messages buffered per connection before it is dropped (default: 64)
    pub outbox_capacity: usize,
    /// CORS allowed origins (comma-separated, empty allows any)
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_path =
            PathBuf::from(env::var("DATABASE_PATH").unwrap_or_else(|_| "./scribe.db".to_string()));

        let session_expiry_hours = env::var("SESSION_EXPIRY_HOURS")
            .unwrap_or_else(|_| "72".to_string())
            .parse()
            .unwrap_or(72);

        let flush_interval_secs: u64 = env::var("FLUSH_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidFlushInterval)?;
        if flush_interval_secs == 0 {
            return Err(ConfigError::InvalidFlushInterval);
        }

        let outbox_capacity: usize = env::var("OUTBOX_CAPACITY")
            .unwrap_or_else(|_| "64".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidOutboxCapacity)?;
        if outbox_capacity == 0 {
            return Err(ConfigError::InvalidOutboxCapacity);
        }

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            host,
            port,
            database_path,
            session_expiry_hours,
            flush_interval_secs,
            outbox_capacity,
            cors_origins,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the real-time sync core
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            outbox_capacity: self.outbox_capacity,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidFlushInterval,
    InvalidOutboxCapacity,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
            ConfigError::InvalidFlushInterval => {
                write!(f, "FLUSH_INTERVAL_SECS must be a positive integer")
            }
            ConfigError::InvalidOutboxCapacity => {
                write!(f, "OUTBOX_CAPACITY must be a positive integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
