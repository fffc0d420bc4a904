use serde::Deserialize;

/// Top-level client configuration.
/// Loaded from environment variables (prefix `VC`, `__` separator).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Real-time connection settings
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Backend API settings
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket base URL the hub paths are appended to (default: ws://localhost:8080)
    #[serde(default = "default_hub_base_url")]
    pub hub_base_url: String,
    /// Connection handshake timeout in seconds (default: 30)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Outbound invocation timeout in seconds (default: 15)
    #[serde(default = "default_invoke_timeout")]
    pub invoke_timeout_secs: u64,
    /// Automatic in-task reconnect attempts per drop (default: 4, one per
    /// backoff step)
    #[serde(default = "default_auto_reconnect_attempts")]
    pub auto_reconnect_attempts: u32,
    /// Manual reconnect ceiling after the automatic schedule is exhausted (default: 5)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Delay before each manual reconnect, in milliseconds (default: 5000)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// HTTP base URL for the auth probe and token refresh (default: http://localhost:8080)
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

impl AppConfig {
    /// Load config from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("VC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        cfg.try_deserialize()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            hub_base_url: default_hub_base_url(),
            handshake_timeout_secs: default_handshake_timeout(),
            invoke_timeout_secs: default_invoke_timeout(),
            auto_reconnect_attempts: default_auto_reconnect_attempts(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
        }
    }
}

fn default_hub_base_url() -> String {
    "ws://localhost:8080".to_string()
}
fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_handshake_timeout() -> u64 {
    30
}
fn default_invoke_timeout() -> u64 {
    15
}
fn default_auto_reconnect_attempts() -> u32 {
    4
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
