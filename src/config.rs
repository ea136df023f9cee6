use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tracing::warn;

pub const DEMO_KEY: &str = "DEMO_KEY";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_PORT: u16 = 8080;

/// Runtime settings, read from the process environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini: GeminiConfig,
    pub host: IpAddr,
    pub port: u16,
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    /// `None` means requests may wait indefinitely.
    pub timeout: Option<Duration>,
}

// Hand-written so the key never ends up in a log line.
impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"***")
            .field("api_base", &self.api_base)
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GeminiConfig {
    pub fn is_demo(&self) -> bool {
        self.api_key == DEMO_KEY
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: DEMO_KEY.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            timeout: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = GeminiConfig::default();

        let timeout = get("GEMINI_TIMEOUT_SECS").and_then(|raw| match raw.parse::<u64>() {
            Ok(0) => None,
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                warn!("Ignoring invalid GEMINI_TIMEOUT_SECS value: {}", raw);
                None
            }
        });

        let host = get("HOST")
            .and_then(|raw| {
                raw.parse::<IpAddr>()
                    .map_err(|_| warn!("Ignoring invalid HOST value: {}", raw))
                    .ok()
            })
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let port = get("PORT")
            .and_then(|raw| {
                raw.parse::<u16>()
                    .map_err(|_| warn!("Ignoring invalid PORT value: {}", raw))
                    .ok()
            })
            .unwrap_or(DEFAULT_PORT);

        Self {
            gemini: GeminiConfig {
                api_key: get("GEMINI_API_KEY").unwrap_or(defaults.api_key),
                api_base: get("GEMINI_API_BASE")
                    .map(|base| base.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.api_base),
                text_model: get("GEMINI_TEXT_MODEL").unwrap_or(defaults.text_model),
                image_model: get("GEMINI_IMAGE_MODEL").unwrap_or(defaults.image_model),
                timeout,
            },
            host,
            port,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
