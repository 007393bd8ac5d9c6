//! Gatekeeper configuration
//!
//! Loaded from TOML (path in `CAMPUSGATE_CONFIG`), then overridden from the
//! environment, then validated.
//!
//! ```toml
//! environment = "production"
//! bind = "0.0.0.0:8080"
//!
//! [rate_limit]
//! limit = 100
//! window_ms = 10000
//! redis_url = "redis://cache:6379"
//!
//! [[rate_limit.endpoint_classes]]
//! name = "session"
//! path_prefix = "/api/v1/session"
//! limit = 20
//! window_ms = 60000
//!
//! [exemptions]
//! path_prefixes = ["/health", "/ready"]
//! ```

use campus_ratelimit::{EndpointClass, FailoverConfig, RateLimiterConfig, WindowPolicy, DEFAULT_PROXY_HEADERS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Env var holding the config file path
pub const CONFIG_PATH_ENV: &str = "CAMPUSGATE_CONFIG";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment variable with an unusable value
    #[error("invalid value {value:?} for {var}")]
    Env {
        /// Variable name
        var: &'static str,
        /// Value as found
        value: String,
    },

    /// Values parsed but inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Live schools; no bypasses
    #[default]
    Production,
    /// Review deployments
    Preview,
    /// Local runs; seeds demo data
    Development,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "preview" => Ok(Self::Preview),
            "development" | "dev" => Ok(Self::Development),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

/// Rate-limit section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Default requests per window
    pub limit: u64,
    /// Default window length in milliseconds
    pub window_ms: u64,
    /// Upper bound on one distributed-store call
    pub backend_timeout_ms: u64,
    /// Time on the local store before probing the distributed store again
    pub backend_retry_ms: u64,
    /// Interval between purges of expired local windows
    pub sweep_interval_ms: u64,
    /// Unset means local store only
    pub redis_url: Option<String>,
    /// Prefix for distributed window keys
    pub key_prefix: String,
    /// Per-path overrides of the default policy
    pub endpoint_classes: Vec<EndpointClass>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window_ms: 10_000,
            backend_timeout_ms: 50,
            backend_retry_ms: 5_000,
            sweep_interval_ms: 60_000,
            redis_url: None,
            key_prefix: campus_ratelimit::redis_store::DEFAULT_KEY_PREFIX.to_string(),
            endpoint_classes: vec![EndpointClass {
                name: "session".into(),
                path_prefix: "/api/v1/session".into(),
                limit: 20,
                window_ms: 60_000,
            }],
        }
    }
}

/// Exemption section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExemptionConfig {
    /// Paths that skip gatekeeping (health, docs, static assets)
    pub path_prefixes: Vec<String>,
    /// Skip gatekeeping entirely in preview deployments
    pub preview_bypass: bool,
    /// Shared secret for signed platform probes; unset disables probe exemption
    pub probe_secret: Option<String>,
    /// Accepted clock skew for probe timestamps
    pub probe_max_skew_secs: u64,
}

impl Default for ExemptionConfig {
    fn default() -> Self {
        Self {
            path_prefixes: vec![
                "/health".into(),
                "/ready".into(),
                "/api-docs".into(),
                "/static".into(),
                "/favicon.ico".into(),
            ],
            preview_bypass: false,
            probe_secret: None,
            probe_max_skew_secs: 30,
        }
    }
}

/// Proxy section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Trusted client-address headers, highest precedence first
    pub header_precedence: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            header_precedence: DEFAULT_PROXY_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

/// Full gatekeeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Listen address
    pub bind: String,
    /// Rate limiting
    pub rate_limit: RateLimitConfig,
    /// Gatekeeping exemptions
    pub exemptions: ExemptionConfig,
    /// Client address extraction
    pub proxy: ProxyConfig,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            bind: "0.0.0.0:8080".into(),
            rate_limit: RateLimitConfig::default(),
            exemptions: ExemptionConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl GatekeeperConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read a TOML file
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// File from `CAMPUSGATE_CONFIG` (defaults when unset or missing),
    /// environment overrides, validation
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if Path::new(&path).exists() => Self::load_from_path(Path::new(&path))?,
            Ok(path) => {
                tracing::warn!(path = %path, "config file not found, using defaults");
                Self::default()
            }
            Err(_) => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CAMPUSGATE_*` overrides from `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup("CAMPUSGATE_ENV") {
            self.environment = value.parse().map_err(|_| ConfigError::Env {
                var: "CAMPUSGATE_ENV",
                value,
            })?;
        }
        if let Some(value) = lookup("CAMPUSGATE_REDIS_URL") {
            self.rate_limit.redis_url = Some(value).filter(|v| !v.trim().is_empty());
        }
        if let Some(value) = lookup("CAMPUSGATE_PROBE_SECRET") {
            self.exemptions.probe_secret = Some(value);
        }
        if let Some(value) = lookup("CAMPUSGATE_PREVIEW_BYPASS") {
            self.exemptions.preview_bypass = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Env {
                        var: "CAMPUSGATE_PREVIEW_BYPASS",
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup("CAMPUSGATE_BIND") {
            self.bind = value;
        }
        Ok(())
    }

    /// Reject inconsistent values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rl = &self.rate_limit;
        if rl.limit == 0 || rl.window_ms == 0 {
            return Err(ConfigError::Invalid("rate_limit.limit and window_ms must be positive".into()));
        }
        if rl.backend_timeout_ms == 0 || rl.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.backend_timeout_ms and sweep_interval_ms must be positive".into(),
            ));
        }
        for class in &rl.endpoint_classes {
            if class.name.trim().is_empty() || !class.path_prefix.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "endpoint class {:?} needs a name and a path prefix starting with '/'",
                    class.name
                )));
            }
            if class.limit == 0 || class.window_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "endpoint class {:?} needs a positive limit and window",
                    class.name
                )));
            }
        }
        if self.exemptions.path_prefixes.iter().any(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid("exemption prefixes must start with '/'".into()));
        }
        // "/" would exempt every path
        if self.exemptions.path_prefixes.iter().any(|p| p.trim_end_matches('/').is_empty()) {
            return Err(ConfigError::Invalid("exemption prefix cannot be the root path".into()));
        }
        if matches!(&self.exemptions.probe_secret, Some(secret) if secret.trim().is_empty()) {
            return Err(ConfigError::Invalid("probe_secret is set but empty".into()));
        }
        if self.exemptions.preview_bypass && self.environment == Environment::Production {
            return Err(ConfigError::Invalid("preview_bypass cannot be enabled in production".into()));
        }
        if self.proxy.header_precedence.is_empty() {
            return Err(ConfigError::Invalid("proxy.header_precedence is empty".into()));
        }
        Ok(())
    }

    /// Limiter settings derived from the rate-limit section
    pub fn limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            default_policy: WindowPolicy::new(self.rate_limit.limit, self.rate_limit.window_ms),
            classes: self.rate_limit.endpoint_classes.clone(),
            proxy_headers: self
                .proxy
                .header_precedence
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Failover settings derived from the rate-limit section
    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            backend_timeout: std::time::Duration::from_millis(self.rate_limit.backend_timeout_ms),
            retry_after: chrono::Duration::milliseconds(self.rate_limit.backend_retry_ms as i64),
        }
    }

    /// Sweeper period
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.rate_limit.sweep_interval_ms)
    }
}
