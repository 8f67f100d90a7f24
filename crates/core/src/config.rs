use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Default upper bound for one document chunk, in characters
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1600;

/// Smallest chunk window the chunker accepts from configuration
pub const MIN_MAX_CHUNK_CHARS: usize = 200;

/// Default length of provenance evidence excerpts, in characters
pub const DEFAULT_EVIDENCE_EXCERPT_CHARS: usize = 280;

/// Storage engine settings (`[store]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Database file (absolute path)
    pub db_path: PathBuf,

    /// Try to create the full-text index (default: true)
    #[serde(default = "default_true")]
    pub enable_fts: bool,

    /// Upper bound for one document chunk, in characters
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// Length of provenance evidence excerpts, in characters
    #[serde(default = "default_evidence_excerpt_chars")]
    pub evidence_excerpt_chars: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            enable_fts: true,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            evidence_excerpt_chars: DEFAULT_EVIDENCE_EXCERPT_CHARS,
        }
    }
}

/// File logging settings (`[logging.file]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileLoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_file_level")]
    pub level: String,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self { enabled: false, level: default_file_level() }
    }
}

/// Privacy controls for captured text in logs (`[logging.privacy]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PrivacyLoggingConfig {
    /// Allow excerpts of captured text in trace logs
    #[serde(default)]
    pub log_captured_text: bool,
    #[serde(default = "default_truncate_length")]
    pub truncate_length: usize,
}

impl Default for PrivacyLoggingConfig {
    fn default() -> Self {
        Self { log_captured_text: false, truncate_length: default_truncate_length() }
    }
}

/// Logging settings (`[logging]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub file: FileLoggingConfig,
    #[serde(default)]
    pub privacy: PrivacyLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            file: FileLoggingConfig::default(),
            privacy: PrivacyLoggingConfig::default(),
        }
    }
}

/// Root configuration structure for webclip.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

fn default_max_chunk_chars() -> usize {
    DEFAULT_MAX_CHUNK_CHARS
}

fn default_evidence_excerpt_chars() -> usize {
    DEFAULT_EVIDENCE_EXCERPT_CHARS
}

fn default_level() -> String {
    "warn".to_string()
}

fn default_file_level() -> String {
    "debug".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

fn default_truncate_length() -> usize {
    200
}

/// `~/.webclip/webclip.db`, or a relative `webclip.db` when no home is known
pub fn default_db_path() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".webclip").join("webclip.db"))
        .unwrap_or_else(|_| PathBuf::from("webclip.db"))
}

impl Config {
    /// Load configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(toml_str).map_err(|e| crate::Error::Config(ConfigError::from(e).to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        use crate::Error;

        if !self.store.db_path.is_absolute() {
            return Err(Error::Config(
                ConfigError::AbsolutePathRequired("store.db_path".to_string()).to_string(),
            ));
        }

        if self.store.max_chunk_chars < MIN_MAX_CHUNK_CHARS {
            return Err(Error::Config(
                ConfigError::ChunkWindowTooSmall(self.store.max_chunk_chars).to_string(),
            ));
        }

        if self.store.evidence_excerpt_chars == 0 {
            return Err(Error::Config(ConfigError::EmptyExcerpt.to_string()));
        }

        Ok(())
    }

    /// Get example configuration (as a string)
    pub fn example() -> &'static str {
        r#"# Webclip Configuration Example
# Copy this file to webclip.toml and customize as needed

[store]
# Database file (must be an absolute path)
db_path = "/path/to/webclip.db"
# Create the full-text index when the SQLite build supports it
enable_fts = true
# Upper bound for one document chunk, in characters (>= 200)
max_chunk_chars = 1600
# Length of provenance evidence excerpts
evidence_excerpt_chars = 280

[logging]
# Default stderr level: trace, debug, info, warn, error
level = "warn"
# Stderr format: pretty, json, compact
format = "pretty"

[logging.file]
enabled = false
level = "debug"

[logging.privacy]
# Include excerpts of captured text in trace logs
log_captured_text = false
truncate_length = 200
"#
    }
}

/// Configuration-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Absolute path required
    #[error("absolute path required: {0}")]
    AbsolutePathRequired(String),

    /// Chunk window below the supported minimum
    #[error("store.max_chunk_chars must be at least {MIN_MAX_CHUNK_CHARS}, got {0}")]
    ChunkWindowTooSmall(usize),

    /// Evidence excerpts must carry text
    #[error("store.evidence_excerpt_chars must be greater than zero")]
    EmptyExcerpt,

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlParse(err.to_string())
    }
}
