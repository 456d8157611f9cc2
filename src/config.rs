use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::memory::DEFAULT_KEY;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL for the API. Optional, each provider has a default.
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Falls back to the provider's environment variable when unset.
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmConfig {
    pub fn api_key_env(&self) -> &'static str {
        match self.provider.as_str() {
            "gemini" | "google" => "GEMINI_API_KEY",
            "anthropic" => "ANTHROPIC_API_KEY",
            _ => "OPENAI_API_KEY",
        }
    }

    /// The configured key, else the provider's env var. Blank keys count as missing.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    fn resolve_api_key_with(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| env(self.api_key_env()).filter(|k| !k.trim().is_empty()))
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

#[derive(Debug, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_key")]
    pub key: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            key: default_key(),
        }
    }
}

impl MemoryConfig {
    pub fn store_dir(&self) -> PathBuf {
        self.base_dir.join("store")
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kioku")
}

fn default_key() -> String {
    DEFAULT_KEY.to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct PromptsConfig {
    #[serde(default)]
    pub base: String,
    pub base_file: Option<PathBuf>,
    #[serde(default)]
    pub custom: String,
    pub custom_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
            api_key: None,
        }
    }
}

fn default_api_bind() -> String {
    "127.0.0.1:3000".to_string()
}

pub fn load(path: &str) -> Result<Config> {
    let path = expand_tilde(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    parse(&content)
}

fn parse(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
    config.memory.base_dir = expand_tilde(&config.memory.base_dir.to_string_lossy());
    Ok(config)
}

pub async fn init_config_dir(base: &Path) -> Result<()> {
    for d in ["store", "prompts"] {
        tokio::fs::create_dir_all(base.join(d)).await?;
    }

    let base_prompt = base.join("prompts/base.md");
    if !base_prompt.exists() {
        tokio::fs::write(
            &base_prompt,
            "You are a friendly, helpful assistant. Answer clearly and concisely.\n",
        )
        .await?;
    }

    let custom_prompt = base.join("prompts/custom.md");
    if !custom_prompt.exists() {
        tokio::fs::write(&custom_prompt, "(Add your own instructions here.)\n").await?;
    }

    let config_path = base.join("config.toml");
    if !config_path.exists() {
        tokio::fs::write(
            &config_path,
            format!(
                r#"[llm]
provider = "gemini"
model = "gemini-2.5-flash"
# api_key = "YOUR_API_KEY"  # optional, falls back to GEMINI_API_KEY
max_tokens = 8192

# Other provider examples:
# provider = "anthropic"     # key from ANTHROPIC_API_KEY
# model = "claude-sonnet-4-5-20250929"
#
# provider = "openai"        # key from OPENAI_API_KEY
# model = "gpt-4o"
# base_url = "https://api.openai.com/v1"  # optional, uses provider default

[memory]
base_dir = "{}"
key = "{DEFAULT_KEY}"

[prompts]
base_file = "prompts/base.md"
custom_file = "prompts/custom.md"

[api]
bind = "127.0.0.1:3000"
# api_key = "YOUR_BEARER_TOKEN"  # required for non-localhost binds
"#,
                base.display()
            ),
        )
        .await?;
    }

    Ok(())
}

pub fn default_config_dir() -> PathBuf {
    default_base_dir()
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
