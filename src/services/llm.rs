use crate::core::config::{Config, ConfigError};
use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "gemini" or "proxy"
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            gemini: GeminiConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_url")]
    pub base_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_url: default_proxy_url(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}
fn default_proxy_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

// --- Client contract ---

/// One prompt plus optional generation settings.
///
/// This is also the JSON body of `POST /api/generate`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Ask the model for an `application/json` response.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub json: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error("AI service error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("Received an empty response from the AI (finish reason: {0}).")]
    EmptyResponse(String),
    #[error("Unexpected response from the AI service: {0}")]
    InvalidResponse(String),
    #[error("Could not reach the AI service: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(target_arch = "wasm32")]
pub trait LlmBounds {}
#[cfg(target_arch = "wasm32")]
impl<T> LlmBounds for T {}

#[cfg(not(target_arch = "wasm32"))]
pub trait LlmBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> LlmBounds for T {}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait LlmClient: LlmBounds + Debug {
    async fn generate(&self, request: &PromptRequest) -> Result<String, LlmError>;
}

pub fn create_llm(config: &Config) -> Result<Box<dyn LlmClient>, ConfigError> {
    match config.llm.provider.as_str() {
        #[cfg(not(target_arch = "wasm32"))]
        "gemini" => {
            let api_key = config.require_api_key()?;
            Ok(Box::new(GeminiClient::new(api_key, &config.llm.gemini.model)))
        }
        "proxy" => {
            let base_url = config.llm.proxy.base_url.trim();
            if base_url.is_empty() {
                return Err(ConfigError::MissingProxyUrl);
            }
            Ok(Box::new(ProxyClient::new(base_url)))
        }
        other => Err(ConfigError::UnknownProvider(other.to_string())),
    }
}

// --- Gemini ---

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::with_base_url(api_key, model, GEMINI_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> Result<url::Url, LlmError> {
        url::Url::parse_with_params(
            &format!("{}/models/{}:generateContent", self.base_url, self.model),
            &[("key", self.api_key.as_str())],
        )
        .map_err(|e| LlmError::InvalidResponse(format!("bad endpoint: {}", e)))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

impl From<&PromptRequest> for GeminiRequest {
    fn from(request: &PromptRequest) -> Self {
        let generation_config = GeminiGenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            response_mime_type: request.json.then(|| "application/json".to_string()),
        };
        let has_config = generation_config.temperature.is_some()
            || generation_config.top_p.is_some()
            || generation_config.top_k.is_some()
            || generation_config.response_mime_type.is_some();

        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: request.prompt.clone(),
                }],
            }],
            system_instruction: request.system.as_ref().map(|system| GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: system.clone(),
                }],
            }),
            generation_config: has_config.then_some(generation_config),
        }
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    #[serde(default)]
    code: Option<u16>,
    message: String,
}

/// Pulls the generated text out of a `generateContent` response body.
fn extract_gemini_text(body: &str) -> Result<String, LlmError> {
    let result: GeminiResponse = serde_json::from_str(body).map_err(|e| {
        LlmError::InvalidResponse(format!("failed to parse Gemini response: {}", e))
    })?;

    if let Some(err) = result.error {
        return Err(LlmError::Upstream {
            status: err.code.unwrap_or(500),
            message: err.message,
        });
    }

    let first = result
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .ok_or_else(|| LlmError::EmptyResponse("NO_CANDIDATES".to_string()))?;

    let text: String = first
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<Vec<_>>()
                .concat()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
        return Err(LlmError::EmptyResponse(reason.to_string()));
    }
    Ok(text)
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl LlmClient for GeminiClient {
    async fn generate(&self, request: &PromptRequest) -> Result<String, LlmError> {
        let url = self.endpoint()?;
        let body = GeminiRequest::from(request);
        debug!("Calling Gemini model {}", self.model);

        let resp = self.client.post(url).json(&body).send().await?;

        let status = resp.status();
        let response_text = resp.text().await?;
        if !status.is_success() {
            error!("Google API Error: {}", response_text);
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                message: format!("Google API Error: {}", response_text),
            });
        }

        extract_gemini_text(&response_text)
    }
}

// --- Proxy ---

/// Talks to our own `/api/generate` endpoint; the API key stays on the server.
#[derive(Debug)]
pub struct ProxyClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ProxyResponse {
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ProxyErrorResponse {
    pub error: String,
}

impl ProxyClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl LlmClient for ProxyClient {
    async fn generate(&self, request: &PromptRequest) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let resp = self.client.post(&url).json(request).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ProxyErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let result: ProxyResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::InvalidResponse(format!("{}: {}", e, body)))?;
        Ok(result.text)
    }
}
