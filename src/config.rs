use crate::credentials::DEFAULT_COOLDOWN;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

const PLACEHOLDER_KEYS: &[&str] = &["your_api_key_here", "your_groq_api_key_here"];

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    api: ApiConfig,
    #[serde(default)]
    generation: GenerationConfig,
    #[serde(default)]
    credentials: CredentialsConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    images: ImageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ServerConfig {
    bind: String,
    request_timeout: u64,
    chat_rate_limit: u32,
    chat_rate_window: u64,
    api_rate_limit: u32,
    api_rate_window: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            request_timeout: 60,
            chat_rate_limit: 20,
            chat_rate_window: 60,
            api_rate_limit: 100,
            api_rate_window: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiConfig {
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default = "default_api_url")]
    url: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default)]
    keys: Vec<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_api_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.8,
            max_tokens: 8192,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct CredentialsConfig {
    cooldown: u64,
    rate_limit_retries: u32,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN.as_secs(),
            rate_limit_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StorageConfig {
    database_url: Option<String>,
    monitor_interval: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            monitor_interval: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub base_url: String,
    pub width: u32,
    pub height: u32,
    pub prompt_suffix: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base_url: "https://image.pollinations.ai/prompt".to_string(),
            width: 1024,
            height: 1024,
            prompt_suffix: ", high quality, detailed, professional".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub request_timeout: Duration,
    /// Per-client request caps; a limit of 0 turns the cap off.
    pub chat_rate_limit: u32,
    pub chat_rate_window: Duration,
    pub api_rate_limit: u32,
    pub api_rate_window: Duration,
    pub api_provider: String,
    pub api_url: String,
    pub model: String,
    pub api_keys: Vec<String>,
    pub generation: GenerationConfig,
    pub key_cooldown: Duration,
    pub rate_limit_retries: u32,
    pub database_url: Option<String>,
    pub monitor_interval: Duration,
    pub images: ImageConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&content, std::env::var("EXTRAIN_API_KEYS").ok().as_deref())
    }

    pub fn load() -> Result<Self> {
        let path = std::env::var("EXTRAIN_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        Self::from_file(&path)
    }

    /// `keys_override` is a comma-separated key list that replaces `api.keys`.
    fn from_toml(content: &str, keys_override: Option<&str>) -> Result<Self> {
        let config_file: ConfigFile =
            toml::from_str(content).context("Failed to parse config file")?;

        let raw_keys = match keys_override {
            Some(list) => list.split(',').map(String::from).collect(),
            None => config_file.api.keys,
        };
        let api_keys = usable_keys(raw_keys);
        if api_keys.is_empty() {
            anyhow::bail!(
                "No valid completion API keys configured (set api.keys or EXTRAIN_API_KEYS)"
            );
        }

        Ok(Self {
            bind_addr: config_file.server.bind,
            request_timeout: Duration::from_secs(config_file.server.request_timeout),
            chat_rate_limit: config_file.server.chat_rate_limit,
            chat_rate_window: Duration::from_secs(config_file.server.chat_rate_window.max(1)),
            api_rate_limit: config_file.server.api_rate_limit,
            api_rate_window: Duration::from_secs(config_file.server.api_rate_window.max(1)),
            api_provider: config_file.api.provider,
            api_url: config_file.api.url,
            model: config_file.api.model,
            api_keys,
            generation: config_file.generation,
            key_cooldown: Duration::from_secs(config_file.credentials.cooldown),
            rate_limit_retries: config_file.credentials.rate_limit_retries,
            database_url: config_file.storage.database_url.filter(|u| !u.trim().is_empty()),
            monitor_interval: Duration::from_secs(config_file.storage.monitor_interval.max(1)),
            images: config_file.images,
        })
    }
}

fn usable_keys(raw: Vec<String>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(raw.len());
    for key in raw {
        let key = key.trim().to_string();
        if key.is_empty() || is_placeholder(&key) || keys.contains(&key) {
            continue;
        }
        keys.push(key);
    }
    keys
}

fn is_placeholder(key: &str) -> bool {
    PLACEHOLDER_KEYS.contains(&key)
        || key
            .strip_prefix("YOUR_API_KEY_")
            .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [api]
        keys = ["gsk_one", "gsk_two"]
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL, None).unwrap();
        assert_eq!(config.api_keys, vec!["gsk_one", "gsk_two"]);
        assert_eq!(config.api_provider, "openai");
        assert_eq!(config.model, "llama-3.3-70b-versatile");
        assert_eq!(config.bind_addr, "0.0.0.0:5000");
        assert_eq!(config.key_cooldown, Duration::from_secs(120));
        assert_eq!(config.rate_limit_retries, 0);
        assert_eq!(config.generation, GenerationConfig::default());
        assert!(config.database_url.is_none());
        assert_eq!(config.images.width, 1024);
        assert_eq!(config.chat_rate_limit, 20);
        assert_eq!(config.chat_rate_window, Duration::from_secs(60));
        assert_eq!(config.api_rate_limit, 100);
        assert_eq!(config.api_rate_window, Duration::from_secs(900));
    }

    #[test]
    fn full_config_is_parsed() {
        let content = r#"
            [server]
            bind = "127.0.0.1:8080"
            request_timeout = 15
            chat_rate_limit = 0
            api_rate_window = 60

            [api]
            provider = "gemini"
            model = "gemini-1.5-flash"
            keys = ["k1"]

            [generation]
            temperature = 0.2

            [credentials]
            cooldown = 30
            rate_limit_retries = 1

            [storage]
            database_url = "sqlite:data/conversations.db?mode=rwc"
            monitor_interval = 10

            [images]
            width = 512
        "#;
        let config = Config::from_toml(content, None).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.chat_rate_limit, 0);
        assert_eq!(config.api_rate_limit, 100);
        assert_eq!(config.api_rate_window, Duration::from_secs(60));
        assert_eq!(config.api_provider, "gemini");
        assert_eq!(config.generation.temperature, 0.2);
        assert_eq!(config.generation.max_tokens, 8192);
        assert_eq!(config.key_cooldown, Duration::from_secs(30));
        assert_eq!(config.rate_limit_retries, 1);
        assert_eq!(
            config.database_url.as_deref(),
            Some("sqlite:data/conversations.db?mode=rwc")
        );
        assert_eq!(config.images.width, 512);
        assert_eq!(config.images.height, 1024);
    }

    #[test]
    fn placeholders_blanks_and_duplicates_are_dropped() {
        let content = r#"
            [api]
            keys = [" real ", "", "YOUR_API_KEY_2", "your_api_key_here", "real", "other"]
        "#;
        let config = Config::from_toml(content, None).unwrap();
        assert_eq!(config.api_keys, vec!["real", "other"]);
    }

    #[test]
    fn no_usable_key_fails_startup() {
        let content = r#"
            [api]
            keys = ["YOUR_API_KEY_3"]
        "#;
        assert!(Config::from_toml(content, None).is_err());
        assert!(Config::from_toml("[api]\n", None).is_err());
    }

    #[test]
    fn env_key_list_overrides_file() {
        let config = Config::from_toml(MINIMAL, Some("env_a, env_b,,")).unwrap();
        assert_eq!(config.api_keys, vec!["env_a", "env_b"]);
    }
}
