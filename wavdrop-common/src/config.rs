//! Configuration loading and resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Command-line and environment values arrive together as [`ConfigOverrides`]
//! (the binary's argument parser reads both); this module owns the TOML layer
//! and the defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Default HTTP port for wavdrop-web
pub const DEFAULT_PORT: u16 = 5730;

/// Default bind address (loopback only)
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default bucket name
pub const DEFAULT_BUCKET: &str = "my-audio-bucket";

/// Default upload body limit (200 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

/// Config file name inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "wavdrop.toml";

/// Environment variable names shared by the binary's argument parser
pub const ENV_CONFIG: &str = "WAVDROP_CONFIG";
pub const ENV_PORT: &str = "WAVDROP_PORT";
pub const ENV_BIND: &str = "WAVDROP_BIND";
pub const ENV_STORAGE_BACKEND: &str = "WAVDROP_STORAGE_BACKEND";
pub const ENV_STORAGE_URL: &str = "WAVDROP_STORAGE_URL";
pub const ENV_STORAGE_KEY: &str = "WAVDROP_STORAGE_KEY";
pub const ENV_BUCKET: &str = "WAVDROP_BUCKET";

/// Complete service configuration as read from `wavdrop.toml`
///
/// Every section is optional; missing sections and fields fall back to
/// compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub scratch: ScratchConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (default 127.0.0.1)
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on (default 5730)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body for uploads, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Which object-storage implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Supabase Storage REST API
    #[default]
    Supabase,
    /// In-process bucket, lost on exit (local demos, tests)
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Supabase => "supabase",
            StorageBackend::Memory => "memory",
        }
    }
}

impl FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(StorageBackend::Supabase),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(Error::Config(format!(
                "Unknown storage backend '{}' (expected 'supabase' or 'memory')",
                other
            ))),
        }
    }
}

/// Object storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Project URL, e.g. `https://<project-ref>.supabase.co`
    #[serde(default)]
    pub url: Option<String>,

    /// Anon or service key sent as bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    /// Bucket receiving both artifact prefixes
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Per-request timeout; unset means requests may wait indefinitely
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// Local scratch directories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchConfig {
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,

    #[serde(default = "default_spectrogram_dir")]
    pub spectrogram_dir: PathBuf,
}

/// What the batch loop does when one file fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FailurePolicy {
    /// Stop the batch at the failing file; later files are never attempted
    #[default]
    #[serde(rename = "abort")]
    AbortBatch,
    /// Record the failure and continue with the next file
    #[serde(rename = "skip")]
    SkipFile,
}

/// Batch processing settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("temp_audio")
}

fn default_spectrogram_dir() -> PathBuf {
    PathBuf::from("temp_spectrograms")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            url: None,
            api_key: None,
            bucket: default_bucket(),
            request_timeout_secs: None,
        }
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            audio_dir: default_audio_dir(),
            spectrogram_dir: default_spectrogram_dir(),
        }
    }
}

/// Values supplied on the command line or through environment variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub storage_backend: Option<StorageBackend>,
    pub storage_url: Option<String>,
    pub storage_key: Option<String>,
    pub bucket: Option<String>,
}

impl TomlConfig {
    /// Apply CLI/environment overrides on top of the file values
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bind) = overrides.bind {
            self.server.bind = bind;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(backend) = overrides.storage_backend {
            self.storage.backend = backend;
        }
        if let Some(url) = overrides.storage_url {
            self.storage.url = Some(url);
        }
        if let Some(key) = overrides.storage_key {
            self.storage.api_key = Some(key);
        }
        if let Some(bucket) = overrides.bucket {
            self.storage.bucket = bucket;
        }
    }

    /// Check values that would otherwise fail later in confusing ways
    pub fn validate(&self) -> Result<()> {
        if self.storage.bucket.trim().is_empty() {
            return Err(Error::Config("storage.bucket must not be empty".to_string()));
        }
        if self.storage.bucket.contains('/') {
            return Err(Error::Config(format!(
                "storage.bucket must not contain '/': {}",
                self.storage.bucket
            )));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(Error::Config(
                "server.max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.scratch.audio_dir.as_os_str().is_empty()
            || self.scratch.spectrogram_dir.as_os_str().is_empty()
        {
            return Err(Error::Config("scratch directories must not be empty".to_string()));
        }
        Ok(())
    }

    /// Copy of this config that is safe to print (API key masked)
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.storage.api_key.is_some() {
            copy.storage.api_key = Some("********".to_string());
        }
        copy
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))
    }
}

/// Validate an API key or URL value (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Platform default config file path (`<config_dir>/wavdrop/wavdrop.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wavdrop").join(CONFIG_FILE_NAME))
}

/// Parse TOML text into a config
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Load the TOML layer
///
/// An explicitly requested file must exist. The platform default file is
/// optional: when it is missing the service starts on compiled defaults with
/// a warning.
pub fn load_toml_config(explicit_path: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit_path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read config file {} failed: {}", path.display(), e))
        })?;
        let config = parse_toml_config(&content)?;
        info!("Loaded TOML configuration from {}", path.display());
        return Ok(config);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!("Read config file {} failed: {}", path.display(), e))
            })?;
            let config = parse_toml_config(&content)?;
            info!("Loaded TOML configuration from {}", path.display());
            Ok(config)
        }
        Some(path) => {
            warn!(
                "Config file not found at {}, using compiled defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            warn!("Could not determine config directory, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.server.port, 5730);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.storage.backend, StorageBackend::Supabase);
        assert_eq!(config.storage.bucket, "my-audio-bucket");
        assert_eq!(config.scratch.audio_dir, PathBuf::from("temp_audio"));
        assert_eq!(config.scratch.spectrogram_dir, PathBuf::from("temp_spectrograms"));
        assert_eq!(config.batch.failure_policy, FailurePolicy::AbortBatch);
        assert!(config.storage.request_timeout_secs.is_none());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("supabase".parse::<StorageBackend>().unwrap(), StorageBackend::Supabase);
        assert_eq!(" Memory ".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("s3".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
    }

    #[test]
    fn test_redacted_masks_api_key() {
        let mut config = TomlConfig::default();
        config.storage.api_key = Some("secret-value".to_string());
        let text = config.redacted().to_toml_string().unwrap();
        assert!(!text.contains("secret-value"));
        assert!(text.contains("********"));
    }
}
