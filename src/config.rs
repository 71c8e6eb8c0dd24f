//! Configuration management for tablesync
//!
//! Connection settings come from the environment (optionally a `.env` file);
//! recurring jobs can be declared in ~/.config/tablesync/jobs.toml

use crate::db::DatabaseBackend;
use crate::scheduler::JobRequest;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a single database connection
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    /// Role label used in logs ("source", "destination")
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: String::new(),
        }
    }
}

impl ConnectionConfig {
    /// Read `<PREFIX>_USER`, `_PASSWORD`, `_DB`, `_HOST`, `_PORT`
    fn from_env(prefix: &str, defaults: ConnectionConfig) -> Result<Self> {
        let var = |suffix: &str| std::env::var(format!("{}_{}", prefix, suffix)).ok();

        let port = match var("PORT") {
            Some(p) => p
                .trim()
                .parse()
                .with_context(|| format!("{}_PORT must be a port number, got '{}'", prefix, p))?,
            None => defaults.port,
        };

        Ok(Self {
            name: defaults.name,
            host: var("HOST").unwrap_or(defaults.host),
            port,
            user: var("USER").unwrap_or(defaults.user),
            password: var("PASSWORD").unwrap_or(defaults.password),
            database: var("DB").unwrap_or(defaults.database),
        })
    }

    /// Check if all required fields are filled
    pub fn is_valid(&self) -> bool {
        !self.host.trim().is_empty()
            && self.port > 0
            && !self.user.trim().is_empty()
            // password can be empty for trust/socket auth
            && !self.database.trim().is_empty()
    }
}

/// Pool limits shared by both roles
#[derive(Clone, Debug, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Process configuration
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub database_type: DatabaseBackend,
    pub source: ConnectionConfig,
    pub destination: ConnectionConfig,
    pub pool: PoolConfig,
    /// Verbose SQL logging
    pub debug: bool,
}

impl SyncConfig {
    /// Load from the environment, reading `.env` first when present
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("loaded environment from {}", path.display());
        }

        let database_type = std::env::var("DATABASE_TYPE")
            .unwrap_or_else(|_| "mysql".to_string())
            .parse::<DatabaseBackend>()
            .context("Invalid DATABASE_TYPE")?;

        let default_port = match database_type {
            DatabaseBackend::MySql => 3306,
            DatabaseBackend::Postgres => 5432,
        };

        let source = ConnectionConfig::from_env(
            "SOURCE",
            ConnectionConfig {
                name: "source".to_string(),
                host: "mysql_source".to_string(),
                port: default_port,
                user: "root".to_string(),
                password: "password".to_string(),
                database: "source_db".to_string(),
            },
        )?;
        let destination = ConnectionConfig::from_env(
            "DESTINATION",
            ConnectionConfig {
                name: "destination".to_string(),
                host: "mysql_destination".to_string(),
                port: default_port,
                user: "root".to_string(),
                password: "password".to_string(),
                database: "destination_db".to_string(),
            },
        )?;

        let defaults = PoolConfig::default();
        let pool = PoolConfig {
            max_connections: env_parse("DB_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections),
            acquire_timeout: env_parse("DB_ACQUIRE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
        };

        let debug = std::env::var("DEBUG")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        Ok(Self {
            database_type,
            source,
            destination,
            pool,
            debug,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        Err(_) => Ok(None),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Recurring jobs declared on disk
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct JobsFile {
    #[serde(default)]
    pub jobs: Vec<JobRequest>,
}

impl JobsFile {
    /// Get the default jobs file path (~/.config/tablesync/jobs.toml)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("tablesync");

        Ok(config_dir.join("jobs.toml"))
    }

    /// Load jobs from `path`, or the default location when none is given.
    /// A missing default file yields no jobs; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("Jobs file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read jobs file {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse jobs file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
