//! Configuration loading and types for NebulaFS.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, object storage, metadata persistence, upload
//! cleanup, authentication, and observability.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Object storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Expired-upload cleanup settings.
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Authentication settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability settings (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of tokio worker threads.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// TLS settings; TLS is enabled when this section is present.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Request limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            threads: default_threads(),
            tls: None,
            limits: LimitsConfig::default(),
        }
    }
}

/// TLS certificate material for the listener.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Path to the PEM certificate chain.
    pub certificate: String,
    /// Path to the PEM private key.
    pub private_key: String,
}

/// Request/connection limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum accepted request body size in bytes (default 256 MiB).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for published objects.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Directory for in-flight temp files and multipart parts.
    #[serde(default = "default_temp_path")]
    pub temp_path: String,

    /// Multipart upload settings.
    #[serde(default)]
    pub multipart: MultipartConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            temp_path: default_temp_path(),
            multipart: MultipartConfig::default(),
        }
    }
}

/// Multipart upload lifecycle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MultipartConfig {
    /// Seconds from initiation until an upload expires (default 24h).
    #[serde(default = "default_upload_ttl")]
    pub max_upload_ttl_seconds: i64,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            max_upload_ttl_seconds: default_upload_ttl(),
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Background cleanup of expired multipart uploads.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Whether the sweeper runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Extra seconds past `expires_at` before an upload is reaped.
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: i64,

    /// Upper bound on uploads reaped in a single sweep.
    #[serde(default = "default_max_uploads_per_sweep")]
    pub max_uploads_per_sweep: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_seconds: default_sweep_interval(),
            grace_period_seconds: default_grace_period(),
            max_uploads_per_sweep: default_max_uploads_per_sweep(),
        }
    }
}

/// Bearer-token authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Whether bearer-token auth is enforced.
    #[serde(default)]
    pub enabled: bool,

    /// Expected `iss` claim; empty disables the issuer check.
    #[serde(default)]
    pub issuer: String,

    /// Expected `aud` claim; empty disables the audience check.
    #[serde(default)]
    pub audience: String,

    /// JWKS document location: `file://`, a bare path, or http(s).
    #[serde(default)]
    pub jwks_url: String,

    /// Seconds a fetched JWKS document stays cached.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Allowed clock skew when checking `exp` / `nbf`.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,

    /// The only accepted JWT signing algorithm.
    #[serde(default = "default_allowed_alg")]
    pub allowed_alg: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer: String::new(),
            audience: String::new(),
            jwks_url: String::new(),
            cache_ttl_seconds: default_cache_ttl(),
            clock_skew_seconds: default_clock_skew(),
            allowed_alg: default_allowed_alg(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_threads() -> usize {
    4
}

fn default_max_body_bytes() -> u64 {
    268_435_456 // 256 MiB
}

fn default_base_path() -> String {
    "data".to_string()
}

fn default_temp_path() -> String {
    "data/tmp".to_string()
}

fn default_upload_ttl() -> i64 {
    86_400
}

fn default_metadata_path() -> String {
    "data/metadata.db".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_grace_period() -> i64 {
    3_600
}

fn default_max_uploads_per_sweep() -> i64 {
    100
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_clock_skew() -> u64 {
    60
}

fn default_allowed_alg() -> String {
    "RS256".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// -- Loader ------------------------------------------------------------------

impl Config {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.enabled {
            if self.auth.issuer.trim().is_empty() {
                anyhow::bail!("auth.enabled requires a non-blank auth.issuer");
            }
            if self.auth.jwks_url.trim().is_empty() {
                anyhow::bail!("auth.enabled requires a non-blank auth.jwks_url");
            }
        }
        if self.storage.multipart.max_upload_ttl_seconds <= 0 {
            anyhow::bail!("storage.multipart.max_upload_ttl_seconds must be positive");
        }
        if self.cleanup.sweep_interval_seconds == 0 {
            anyhow::bail!("cleanup.sweep_interval_seconds must be positive");
        }
        if self.cleanup.max_uploads_per_sweep <= 0 {
            anyhow::bail!("cleanup.max_uploads_per_sweep must be positive");
        }
        Ok(())
    }
}

/// Load, parse, and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.threads, 4);
        assert!(config.server.tls.is_none());
        assert_eq!(config.server.limits.max_body_bytes, 268_435_456);
        assert_eq!(config.storage.base_path, "data");
        assert_eq!(config.storage.temp_path, "data/tmp");
        assert_eq!(config.storage.multipart.max_upload_ttl_seconds, 86_400);
        assert_eq!(config.metadata.path, "data/metadata.db");
        assert!(config.cleanup.enabled);
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.allowed_alg, "RS256");
        assert_eq!(config.observability.log_level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = "
server:
  port: 9100
  limits:
    max_body_bytes: 1024
cleanup:
  sweep_interval_seconds: 5
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.limits.max_body_bytes, 1024);
        assert_eq!(config.cleanup.sweep_interval_seconds, 5);
        // Untouched sections keep their defaults.
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.cleanup.grace_period_seconds, 3_600);
    }

    #[test]
    fn test_auth_enabled_requires_issuer_and_jwks() {
        let yaml = "
auth:
  enabled: true
  jwks_url: file:///tmp/jwks.json
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = "
auth:
  enabled: true
  issuer: https://issuer.example
  jwks_url: file:///tmp/jwks.json
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_nonpositive_cleanup_settings_rejected() {
        let yaml = "
cleanup:
  max_uploads_per_sweep: 0
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = "
storage:
  multipart:
    max_upload_ttl_seconds: -1
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
