//! Configuration file support for faceswap-gateway.
//!
//! Loads optional TOML config from `~/.config/faceswap-gateway/config.toml`.
//! Every field is optional; CLI flags take precedence and anything left
//! unset falls back to built-in defaults.

use serde::Deserialize;

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Server bind address (e.g., "127.0.0.1:8000")
    pub bind: Option<String>,
    /// Directory for request-scoped upload staging
    pub upload_dir: Option<String>,
    /// Directory where finalized outputs are written
    pub output_dir: Option<String>,
    /// Remote face-swap endpoint base URL
    pub remote_endpoint: Option<String>,
    /// Operation identifier on the remote host (e.g., "/predict")
    pub remote_operation: Option<String>,
    /// Cache TTL in seconds (default: 3600)
    pub cache_ttl_seconds: Option<u64>,
    /// Maximum cache entries (default: 100)
    pub cache_max_entries: Option<u64>,
    /// Total remote attempts per request (default: 3)
    pub retry_max_attempts: Option<u32>,
    /// Delay before the first retry, in seconds (default: 2)
    pub retry_base_delay_seconds: Option<u64>,
    /// Backoff multiplier applied after each failed attempt (default: 2.0)
    pub retry_backoff_multiplier: Option<f64>,
    /// Rate limit in requests per minute per IP (0 = no limit)
    pub rate_limit_rpm: Option<u32>,
    /// Allowed CORS origins (None/empty = allow any)
    pub allowed_origins: Option<Vec<String>>,
    /// Largest dimension kept when normalizing uploads (default: 1024)
    pub max_image_dimension: Option<u32>,
}

impl Config {
    /// Load config from the default path, falling back to defaults on any error.
    pub fn load() -> Self {
        let path = dirs::config_dir()
            .unwrap_or_default()
            .join("faceswap-gateway")
            .join("config.toml");
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                Self::default()
            }
        }
    }
}
