use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::state::{
    ExplanationFormat, LearningRequest, DEFAULT_AGE_LEVEL, DEFAULT_FORMAT, DEFAULT_LANGUAGE,
    DEFAULT_READ_ALOUD, DEFAULT_TOPIC, MAX_HISTORY_ITEMS,
};
use crate::services::llm::LlmConfig;

pub const CONFIG_PATH: &str = "config.yml";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY is not set. Add it to the environment or to llm.gemini.api_key in config.yml.")]
    MissingApiKey,
    #[error("llm.proxy.base_url is not set; cannot reach the generation proxy.")]
    MissingProxyUrl,
    #[error("Unknown LLM provider: {0} (expected \"gemini\" or \"proxy\")")]
    UnknownProvider(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub learning: LearningDefaults,

    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

/// Initial values of the learning form.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LearningDefaults {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_age_level")]
    pub age_level: u8,
    #[serde(default = "default_format")]
    pub format: ExplanationFormat,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_read_aloud")]
    pub read_aloud: bool,
}

impl Default for LearningDefaults {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            age_level: default_age_level(),
            format: default_format(),
            language: default_language(),
            read_aloud: default_read_aloud(),
        }
    }
}

impl LearningDefaults {
    pub fn to_request(&self) -> LearningRequest {
        LearningRequest {
            topic: self.topic.clone(),
            age_level: self.age_level,
            format: self.format,
            language: self.language.clone(),
            read_aloud: self.read_aloud,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_static_dir() -> String {
    "public".to_string()
}
fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}
fn default_age_level() -> u8 {
    DEFAULT_AGE_LEVEL
}
fn default_format() -> ExplanationFormat {
    DEFAULT_FORMAT
}
fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}
fn default_read_aloud() -> bool {
    DEFAULT_READ_ALOUD
}
fn default_max_items() -> usize {
    MAX_HISTORY_ITEMS
}
fn default_data_dir() -> String {
    ".stem-spark".to_string()
}

impl Config {
    /// Reads `config.yml` if present (defaults otherwise), then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new(CONFIG_PATH))?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("{:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = var("GEMINI_API_KEY").filter(|k| !k.is_empty()) {
            self.llm.gemini.api_key = key;
        }
        if let Some(model) = var("GEMINI_MODEL").filter(|m| !m.is_empty()) {
            self.llm.gemini.model = model;
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(url) = var("STEM_SPARK_PROXY_URL").filter(|u| !u.is_empty()) {
            self.llm.provider = "proxy".to_string();
            self.llm.proxy.base_url = url;
        }
        if let Some(dir) = var("STEM_SPARK_DATA_DIR").filter(|d| !d.is_empty()) {
            self.history.data_dir = dir;
        }
    }

    /// The API key, or the startup-fatal configuration error.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        let key = self.llm.gemini.api_key.trim();
        if key.is_empty() {
            Err(ConfigError::MissingApiKey)
        } else {
            Ok(key)
        }
    }
}
