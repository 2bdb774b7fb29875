//! Configuration loading and management.
//!
//! Loads duet configuration from `./duet.toml` (or `$DUET_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::delivery::DEFAULT_PREVIEW_CHARS;
use crate::directory::StaticDirectory;
use crate::relations::engine::{EngineSettings, DEFAULT_INVITATION_TTL_DAYS};
use crate::types::PartyId;

// ── Top-level config ────────────────────────────────────────────

/// Top-level duet configuration loaded from TOML.
///
/// Path: `./duet.toml` or `$DUET_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DuetConfig {
    /// SQLite settings (`[database]`).
    pub database: DatabaseConfig,
    /// Invitation settings (`[invitations]`).
    pub invitations: InvitationsConfig,
    /// Notification rendering (`[delivery]`).
    pub delivery: DeliveryConfig,
    /// Log filter and log directory (`[logging]`).
    pub logging: LoggingConfig,
    /// Static login/phone directory (`[directory]`).
    pub directory: DirectoryConfig,
}

impl DuetConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$DUET_CONFIG_PATH` or `./duet.toml`.
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config file {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve config path using a custom env resolver.
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("DUET_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("duet.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process environment.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("DUET_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }

        if let Some(v) = env("DUET_INVITATION_TTL_DAYS") {
            match v.parse() {
                Ok(n) => self.invitations.ttl_days = n,
                Err(_) => tracing::warn!(
                    var = "DUET_INVITATION_TTL_DAYS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        if let Some(v) = env("DUET_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrongly typed values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: DuetConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Engine tunables derived from this config.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            invitation_ttl_days: self.invitations.ttl_days,
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// SQLite settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/duet.db"),
            max_connections: 4,
        }
    }
}

/// Invitation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvitationsConfig {
    /// Days until an invitation's informational `expires_at`.
    pub ttl_days: u32,
}

impl Default for InvitationsConfig {
    fn default() -> Self {
        Self {
            ttl_days: DEFAULT_INVITATION_TTL_DAYS,
        }
    }
}

/// Notification rendering settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Maximum characters of message text in a notification body.
    pub preview_chars: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rolling JSON log files.
    pub logs_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

/// Static identity directory.
///
/// ```toml
/// [directory.logins]
/// "alice@example.com" = "5b0c7c1e-3f57-4a55-9a51-8f3a4f0d2c11"
///
/// [directory.phones]
/// "+1 555 010 2030" = "5b0c7c1e-3f57-4a55-9a51-8f3a4f0d2c11"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Login identity to party id.
    pub logins: HashMap<String, PartyId>,
    /// Phone number to party id. Numbers are normalised on lookup.
    pub phones: HashMap<String, PartyId>,
}

impl DirectoryConfig {
    /// Build a [`StaticDirectory`] from the configured tables.
    pub fn to_directory(&self) -> StaticDirectory {
        let with_logins = self
            .logins
            .iter()
            .fold(StaticDirectory::new(), |dir, (login, party)| {
                dir.with_login(login.clone(), *party)
            });
        self.phones
            .iter()
            .fold(with_logins, |dir, (phone, party)| dir.with_phone(phone, *party))
    }
}
