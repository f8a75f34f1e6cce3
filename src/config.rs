//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the `--config` command-line argument
//! 2. `$MAILINTAKE_CONFIG` (environment variable)
//! 3. `~/.config/mailintake/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailintake\config.toml` (Windows)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IntakeError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Document store location.
    pub database: DatabaseConfig,
    /// External HTML rasterizer.
    pub renderer: RendererConfig,
    /// One entry per mailbox source.
    pub profiles: Vec<ProfileConfig>,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Directory for log files. Defaults to the cache directory.
    pub log_dir: Option<PathBuf>,
    /// Log file rotation: "never", "hourly", "daily".
    pub log_rotation: String,
    /// Where extracted attachments and rendered images are written.
    pub attachments_dir: PathBuf,
}

/// Document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file shared by all workers.
    pub path: PathBuf,
    /// How long a worker waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

/// External HTML-to-image renderer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Path or name of the `wkhtmltoimage` binary.
    pub binary: PathBuf,
    /// Kill the renderer after this many seconds (0 = wait forever).
    pub timeout_secs: u64,
}

/// One mailbox source, as written in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Human-readable profile name, used in logs and `--source`.
    pub name: String,
    pub source: SourceConfig,
    pub image: ImageConfig,
    /// Lines from the first match of this pattern onward are dropped.
    pub regex_last_string_mask: String,
    /// Ordered regex substitutions applied to the cleaned body.
    pub replacements: Vec<Replacement>,
    /// Merged into every persisted record of this source.
    pub extra_fields: BTreeMap<String, serde_json::Value>,
    pub filters: FilterConfig,
}

/// Mailbox login and location.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub login: String,
    pub password: Option<String>,
    /// Name of an environment variable holding the password.
    pub password_env: Option<String>,
    pub imap_host: String,
    pub imap_port: u16,
    pub folder: String,
    /// Socket read/write timeout for the mailbox session, in seconds (0 = none).
    pub timeout_secs: u64,
}

/// Rich-content rendering thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Select the second MIME sub-part (HTML) instead of the first.
    pub force_to_image: bool,
    pub max_width_px: u32,
    pub max_height_px: u32,
}

/// A `pattern` → `substr` regex substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    pub pattern: String,
    pub substr: String,
}

/// Message acceptance rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub receiver_regex_mask: String,
    pub restricted_subjects_regex: Vec<String>,
    /// Reject replies and forwards, keeping only the first mail of a thread.
    pub first_mail_only: bool,
    pub reply_markers: Vec<String>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            log_rotation: "daily".to_string(),
            attachments_dir: PathBuf::from("attachments"),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mailintake.sqlite"),
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("wkhtmltoimage"),
            timeout_secs: 120,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            login: String::new(),
            password: None,
            password_env: None,
            imap_host: String::new(),
            imap_port: 993,
            folder: "INBOX".to_string(),
            timeout_secs: 60,
        }
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("password_env", &self.password_env)
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("folder", &self.folder)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            force_to_image: false,
            max_width_px: 800,
            max_height_px: 1400,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            receiver_regex_mask: ".*".to_string(),
            restricted_subjects_regex: Vec::new(),
            first_mail_only: false,
            reply_markers: vec!["re:".to_string(), "fwd:".to_string(), "fw:".to_string()],
        }
    }
}

impl SourceConfig {
    /// Resolve the password, reading `password_env` when set.
    pub fn resolve_password(&self, profile: &str) -> Result<String> {
        if let Some(var) = &self.password_env {
            return std::env::var(var).map_err(|_| {
                IntakeError::Config(format!(
                    "profile '{profile}': environment variable {var} is not set"
                ))
            });
        }
        self.password.clone().ok_or_else(|| {
            IntakeError::Config(format!("profile '{profile}': no password configured"))
        })
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `explicit`, or from the standard location.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => config_file_path()
            .ok_or_else(|| IntakeError::Config("could not determine config file path".into()))?,
    };
    load_config_from(&path)
}

/// Read and parse a specific config file.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| IntakeError::io(path, e))?;
    let cfg = toml::from_str::<Config>(&contents).map_err(|e| {
        IntakeError::Config(format!("failed to parse '{}': {e}", path.display()))
    })?;
    tracing::info!(
        path = %path.display(),
        profiles = cfg.profiles.len(),
        "Loaded config"
    );
    Ok(cfg)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILINTAKE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailintake").join("config.toml"))
}

/// Return the directory log files are written to.
pub fn log_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailintake")
}
