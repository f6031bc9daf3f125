use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Platform host is empty")]
    EmptyHost,
    #[error("Invalid platform port: {0:?}")]
    InvalidPort(String),
    #[error("Platform token is empty")]
    EmptyToken,
    #[error("Missing setting {0}")]
    Missing(&'static str),
    #[error("Invalid setting {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Address and credentials of the remote platform. Validated once, read-only
/// afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    host: Arc<str>,
    port: u16,
    token: Arc<str>,
}

impl PlatformConfig {
    pub fn new(host: &str, port: &str, token: &str) -> Result<Self, ConfigError> {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;

        Self::with_port(host, port, token)
    }

    pub fn with_port(host: &str, port: u16, token: &str) -> Result<Self, ConfigError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort(port.to_string()));
        }
        if token.is_empty() {
            return Err(ConfigError::EmptyToken);
        }

        Ok(Self {
            host: Arc::from(host),
            port,
            token: Arc::from(token),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// The token never ends up in logs.
impl fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"<redacted>")
            .finish()
    }
}
