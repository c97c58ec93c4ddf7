use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct MotusConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub memory: MemorySettings,
    pub llm: LlmConfig,
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Context-loading knobs. The mode string is resolved to a
/// [`crate::memory::MemoryMode`] at startup; unknown values fall back to
/// `optimized`.
#[derive(Debug, Deserialize, Clone)]
pub struct MemorySettings {
    pub mode: String,
    pub recent_window_minutes: i64,
    pub max_recent_messages: usize,
    pub session_idle_days: i64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            mode: "optimized".to_string(),
            recent_window_minutes: 60,
            max_recent_messages: 20,
            session_idle_days: 7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WhatsAppConfig {
    pub api_url: String,
    #[serde(default)]
    pub token: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub verify_token: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8780,
            verify_token: "motus_verify".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweeperConfig {
    pub interval_minutes: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
        }
    }
}

impl MotusConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        let mut cfg: MotusConfig = s.try_deserialize()?;

        // Secrets come from the environment when the file leaves them blank.
        if cfg.llm.api_key.is_empty() {
            if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
                cfg.llm.api_key = key;
            }
        }
        if cfg.whatsapp.token.is_empty() {
            if let Ok(token) = std::env::var("WHATSAPP_TOKEN") {
                cfg.whatsapp.token = token;
            }
        }

        Ok(cfg)
    }
}
