//! Relay configuration
//!
//! Loaded from an HCL file, then overridden by CLI flags and environment
//! variables in the binary. Every field has a default, so an empty file is
//! a valid configuration.
//!
//! ```hcl
//! server {
//!   host = "0.0.0.0"
//!   port = 8000
//! }
//!
//! keepalive {
//!   period_secs = 300
//! }
//!
//! telegram {
//!   bot_token  = "123456:ABC"
//!   public_url = "https://relay.example.com/"
//! }
//! ```

use crate::error::{RelayError, Result};
use crate::keepalive::{period_from_secs, period_is_schedulable};
use crate::remote::telegram::TELEGRAM_API_BASE;
use crate::session::SessionOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub keepalive: KeepaliveConfig,
    pub session: SessionConfig,
    pub telegram: TelegramConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Self-keepalive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Delay before the self-ping fires; 0 disables the keepalive
    pub period_secs: f64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self { period_secs: 300.0 }
    }
}

impl KeepaliveConfig {
    pub fn period(&self) -> Option<Duration> {
        period_from_secs(self.period_secs)
    }
}

/// Session worker and outbound-call bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long shutdown keeps draining queued events
    pub drain_timeout_ms: u64,

    /// Upper bound on every outbound call
    pub outbound_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 5_000,
            outbound_timeout_ms: 15_000,
        }
    }
}

impl SessionConfig {
    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_millis(self.outbound_timeout_ms)
    }

    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            outbound_timeout: self.outbound_timeout(),
        }
    }
}

/// Telegram bot settings
///
/// When both `bot_token` and `public_url` are set, the relay configures
/// itself at startup instead of waiting for the status page form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub public_url: Option<String>,
    pub passphrase: Option<String>,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            public_url: None,
            passphrase: None,
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }
}

impl TelegramConfig {
    /// Token and URL to configure with at startup, if both are present
    pub fn startup_credentials(&self) -> Option<(&str, &str)> {
        let token = self.bot_token.as_deref().filter(|t| !t.trim().is_empty())?;
        let url = self.public_url.as_deref().filter(|u| !u.trim().is_empty())?;
        Some((token, url))
    }
}

impl RelayConfig {
    /// Parse configuration from HCL text
    pub fn from_hcl(content: &str) -> Result<Self> {
        let config: RelayConfig = hcl::from_str(content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse an HCL configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), "Loading config");
        Self::from_hcl(&content)
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(RelayError::Config("server.port must be non-zero".to_string()));
        }
        if !self.keepalive.period_secs.is_finite() || self.keepalive.period_secs < 0.0 {
            return Err(RelayError::Config(format!(
                "keepalive.period_secs must be a non-negative number, got {}",
                self.keepalive.period_secs
            )));
        }
        if self.keepalive.period_secs > 0.0
            && !self.keepalive.period().is_some_and(period_is_schedulable)
        {
            return Err(RelayError::Config(format!(
                "keepalive.period_secs is too large: {}",
                self.keepalive.period_secs
            )));
        }
        if self.session.outbound_timeout_ms == 0 {
            return Err(RelayError::Config(
                "session.outbound_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.session.drain_timeout_ms == 0 {
            return Err(RelayError::Config(
                "session.drain_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
