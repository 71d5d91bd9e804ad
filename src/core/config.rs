use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

const CONFIG_PATH_DEFAULT: &str = "config/photon.toml";

/// Top-level configuration for the photon gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fanout: Option<FanoutConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Address the HTTP gateway listens on.
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// host:port of the pubsub server.
    pub server: String,
    /// Domain requested during the connect handshake.
    pub domain: String,
}

/// Expiration windows for the three caches, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    #[serde(default = "default_reply_ttl")]
    pub reply_ttl_seconds: u64,
    #[serde(default = "default_subscription_ttl")]
    pub subscription_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: default_session_ttl(),
            reply_ttl_seconds: default_reply_ttl(),
            subscription_ttl_seconds: default_subscription_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn reply_ttl(&self) -> Duration {
        Duration::from_secs(self.reply_ttl_seconds)
    }

    pub fn subscription_ttl(&self) -> Duration {
        Duration::from_secs(self.subscription_ttl_seconds)
    }
}

/// Real-time distribution service used for fan-out. Absent table disables
/// fan-out entirely.
#[derive(Debug, Clone, Deserialize)]
pub struct FanoutConfig {
    /// Base URL of the distribution service API.
    pub base_url: String,
    /// Realm the signed assertions are issued for.
    pub realm: String,
    /// Signing secret for the publish assertions.
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// Optional bind address for the ops endpoint.
    #[serde(default)]
    pub metrics_bind: Option<String>,
    /// Initial log filter, reloadable at runtime.
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_session_ttl() -> u64 {
    600
}

fn default_reply_ttl() -> u64 {
    15
}

fn default_subscription_ttl() -> u64 {
    600
}

impl Config {
    /// Load from the path in PHOTON_CONFIG, falling back to
    /// `config/photon.toml`. PHOTON_LOG overrides the configured log level.
    pub fn load_from_env() -> Result<Self> {
        let path = std::env::var("PHOTON_CONFIG").unwrap_or_else(|_| CONFIG_PATH_DEFAULT.into());
        let mut cfg = Self::load(&path)?;
        if let Ok(level) = std::env::var("PHOTON_LOG") {
            cfg.telemetry.log_level = Some(level);
        }
        Ok(cfg)
    }

    /// Load from a specific file, TOML or JSON selected by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("unable to read config {}", path.display()))?;
        let cfg: Config = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON config {}", path.display()))?
        } else {
            toml::from_str(&data)
                .with_context(|| format!("invalid TOML config {}", path.display()))?
        };
        Ok(cfg)
    }

    /// Schema-level invariants checked before startup.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.bind.is_empty() {
            bail!("gateway.bind must be non-empty");
        }
        if self.upstream.server.is_empty() {
            bail!("upstream.server must be non-empty");
        }
        if self.upstream.domain.is_empty() {
            bail!("upstream.domain must be non-empty");
        }
        if self.cache.reply_ttl_seconds == 0 {
            bail!("cache.reply_ttl_seconds must be > 0");
        }
        if self.cache.session_ttl_seconds == 0 {
            bail!("cache.session_ttl_seconds must be > 0");
        }
        if self.cache.subscription_ttl_seconds == 0 {
            bail!("cache.subscription_ttl_seconds must be > 0");
        }
        if let Some(fanout) = &self.fanout {
            if fanout.base_url.is_empty() {
                bail!("fanout.base_url must be non-empty");
            }
            if fanout.realm.is_empty() {
                bail!("fanout.realm must be non-empty");
            }
            if fanout.key.is_empty() {
                bail!("fanout.key must be non-empty");
            }
        }
        Ok(())
    }
}
