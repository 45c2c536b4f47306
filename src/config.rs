use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};

/// Settings for a provider process: where the engine lives and how the
/// callback server is exposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the orchestration engine (default: http://127.0.0.1:3000)
    #[serde(default = "default_engine_url")]
    pub engine_url: String,

    /// Provider bearer credential used for engine calls
    #[serde(default)]
    pub s2s_key: String,

    /// Host advertised in callback URLs (default: 127.0.0.1)
    #[serde(default = "default_public_host")]
    pub public_host: String,

    /// Port advertised in callback URLs and bound by the server (default: 9000)
    #[serde(default = "default_public_port")]
    pub public_port: u16,

    /// Interface to bind; falls back to `public_host`
    #[serde(default)]
    pub bind_host: Option<String>,

    /// Outbound HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Grace period for in-flight handlers on shutdown, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Maximum accepted callback body size
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,

    /// Whether the engine should accept properties outside kind schemas
    #[serde(default)]
    pub allow_extra_props: bool,
}

fn default_engine_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_public_host() -> String {
    "127.0.0.1".to_string()
}

fn default_public_port() -> u16 {
    9000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_body_limit_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            engine_url: default_engine_url(),
            s2s_key: String::new(),
            public_host: default_public_host(),
            public_port: default_public_port(),
            bind_host: None,
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            body_limit_bytes: default_body_limit_bytes(),
            allow_extra_props: false,
        }
    }
}

impl ProviderConfig {
    /// Config pointing at an engine with the given provider credential
    pub fn new(engine_url: impl Into<String>, s2s_key: impl Into<String>) -> Self {
        Self {
            engine_url: engine_url.into(),
            s2s_key: s2s_key.into(),
            ..Self::default()
        }
    }

    /// Set the host/port advertised to (and bound for) the engine
    pub fn with_public_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.public_host = host.into();
        self.public_port = port;
        self
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ProviderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.engine_url.starts_with("http://") || self.engine_url.starts_with("https://")) {
            return Err(ProviderError::Config(format!(
                "engine_url must be an http(s) URL, got '{}'",
                self.engine_url
            )));
        }
        if self.public_host.is_empty() {
            return Err(ProviderError::Config(
                "public_host cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the listener address string (e.g., "127.0.0.1:9000").
    pub fn bind_address(&self) -> String {
        let host = self.bind_host.as_deref().unwrap_or(&self.public_host);
        format!("{}:{}", host, self.public_port)
    }

    /// Base URL the engine uses to reach this provider.
    pub fn callback_base_url(&self) -> String {
        format!("http://{}:{}", self.public_host, self.public_port)
    }

    /// Engine URL without a trailing slash.
    pub fn engine_base_url(&self) -> &str {
        self.engine_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
