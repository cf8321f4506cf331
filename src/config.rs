//! Environment-driven configuration. `main` loads `.env` through `dotenvy`
//! before calling [`Config::from_env`].

use std::env::VarError;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tracing::info;

use crate::ingest::DEFAULT_HEAL_ATTEMPTS;
use crate::static_feed::{DEFAULT_STATIC_CACHE_DIR, DEFAULT_STATIC_FEED_URL};

pub const REQUIRED_VARIABLES: &[&str] = &["DATABASE_URL"];

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub statement_timeout: Duration,
    pub heal_attempts: u32,
    pub static_feed_url: String,
    pub static_cache_dir: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name))
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Result<String, VarError>) -> anyhow::Result<Self> {
        let var = |name: &str| -> anyhow::Result<Option<String>> {
            match lookup(name) {
                Ok(value) => Ok(Some(value)),
                Err(VarError::NotPresent) => Ok(None),
                Err(VarError::NotUnicode(_)) => Err(anyhow!("{name} value is not valid unicode")),
            }
        };

        let database_url = var("DATABASE_URL")?.ok_or_else(|| anyhow!("DATABASE_URL not set"))?;

        Ok(Self {
            database_url,
            max_connections: parsed(var("DATABASE_MAX_CONNECTIONS")?, "DATABASE_MAX_CONNECTIONS", 5)?,
            statement_timeout: Duration::from_secs(parsed(
                var("STATEMENT_TIMEOUT_SECS")?,
                "STATEMENT_TIMEOUT_SECS",
                30,
            )?),
            heal_attempts: parsed(var("HEAL_ATTEMPTS")?, "HEAL_ATTEMPTS", DEFAULT_HEAL_ATTEMPTS)?,
            static_feed_url: var("STATIC_FEED_URL")?
                .unwrap_or_else(|| DEFAULT_STATIC_FEED_URL.to_string()),
            static_cache_dir: var("STATIC_CACHE_DIR")?
                .unwrap_or_else(|| DEFAULT_STATIC_CACHE_DIR.to_string()),
        })
    }

    /// Logs the effective settings without the connection string.
    pub fn log(&self) {
        info!(
            max_connections = self.max_connections,
            statement_timeout_secs = self.statement_timeout.as_secs(),
            heal_attempts = self.heal_attempts,
            static_feed_url = %self.static_feed_url,
            static_cache_dir = %self.static_cache_dir,
            "Configuration loaded"
        );
    }
}

fn parsed<T>(value: Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has invalid value '{raw}'")),
        None => Ok(default),
    }
}
