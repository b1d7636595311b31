//! Vision-model backends.
//!
//! [`VisionModel`] is the seam between the extraction stage and whatever
//! answers the request. Two backends ship with the crate:
//!
//! * [`OpenAiVisionModel`] — talks to an OpenAI-compatible
//!   `/chat/completions` endpoint with a key supplied per session. The key
//!   lives only in memory and never reaches a log line.
//! * [`ProviderVisionModel`] — wraps any `edgequake-llm` provider; the
//!   provider reads its own credentials from the environment.
//!
//! Tests substitute their own implementation to script replies and failures.

use crate::config::ExtractionConfig;
use crate::error::{MenuError, ModelError};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One extraction request: prompts plus a single encoded image.
#[derive(Clone)]
pub struct VisionRequest {
    pub system_prompt: String,
    pub instruction: String,
    pub image: ImageData,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl VisionRequest {
    /// `data:<mime>;base64,<payload>` URI for the image.
    pub fn image_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.image.mime_type, self.image.data)
    }
}

/// The model's raw textual reply and token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisionReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl VisionReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Anything that can answer a [`VisionRequest`].
pub trait VisionModel: Send + Sync {
    /// Short backend name used in logs and error messages.
    fn name(&self) -> &str;

    fn complete<'a>(
        &'a self,
        request: &'a VisionRequest,
    ) -> BoxFuture<'a, Result<VisionReply, ModelError>>;
}

// ── API key ──────────────────────────────────────────────────────────────

/// A user-supplied API key. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key, rejecting empty or whitespace-only input.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into().trim().to_string();
        (!key.is_empty()).then_some(Self(key))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

// ── OpenAI-compatible HTTP backend ───────────────────────────────────────

/// Calls `{base_url}/chat/completions` with a bearer key.
pub struct OpenAiVisionModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: ApiKey,
    timeout_secs: u64,
}

impl OpenAiVisionModel {
    pub fn new(
        api_key: ApiKey,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, MenuError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| MenuError::ProviderNotConfigured {
                provider: "openai".into(),
                hint: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            timeout_secs,
        })
    }

    /// Build from the config's model, base URL and timeout.
    pub fn from_config(api_key: ApiKey, config: &ExtractionConfig) -> Result<Self, MenuError> {
        Self::new(
            api_key,
            config.model_id(),
            config.api_base_url.clone(),
            config.api_timeout_secs,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn body<'a>(&'a self, request: &'a VisionRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![
                ChatRequestMessage {
                    role: "system",
                    content: MessageContent::Text(&request.system_prompt),
                },
                ChatRequestMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: &request.instruction,
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: request.image_data_uri(),
                            },
                        },
                    ]),
                },
            ],
        }
    }

    async fn send(&self, request: &VisionRequest) -> Result<VisionReply, ModelError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose())
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    ModelError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            let provider = "openai".to_string();
            return Err(match status.as_u16() {
                401 | 403 => ModelError::Auth {
                    provider,
                    detail: api_error_message(&body),
                },
                429 => ModelError::RateLimited {
                    provider,
                    retry_after_secs,
                },
                code => ModelError::Http {
                    provider,
                    status: code,
                    body: api_error_message(&body),
                },
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                ModelError::Transport(format!("invalid response body: {}", e.without_url()))
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::EmptyResponse {
                provider: "openai".into(),
            })?;
        let usage = parsed.usage.unwrap_or_default();
        debug!(
            "{}: {} input tokens, {} output tokens",
            self.model, usage.prompt_tokens, usage.completion_tokens
        );

        Ok(VisionReply {
            content,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}

impl VisionModel for OpenAiVisionModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn complete<'a>(
        &'a self,
        request: &'a VisionRequest,
    ) -> BoxFuture<'a, Result<VisionReply, ModelError>> {
        Box::pin(self.send(request))
    }
}

/// Prefer the `error.message` field of an OpenAI error body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.chars().take(300).collect())
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ── edgequake-llm backend ────────────────────────────────────────────────

/// Adapts an `edgequake-llm` provider to [`VisionModel`].
pub struct ProviderVisionModel {
    name: String,
    provider: Arc<dyn LLMProvider>,
}

impl ProviderVisionModel {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }

    async fn send(&self, request: &VisionRequest) -> Result<VisionReply, ModelError> {
        let messages = vec![
            ChatMessage::system(request.system_prompt.as_str()),
            ChatMessage::user_with_images(request.instruction.as_str(), vec![request.image.clone()]),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ModelError::Provider(e.to_string()))?;

        Ok(VisionReply {
            content: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

impl VisionModel for ProviderVisionModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete<'a>(
        &'a self,
        request: &'a VisionRequest,
    ) -> BoxFuture<'a, Result<VisionReply, ModelError>> {
        Box::pin(self.send(request))
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Pick the backend for a run, from most-specific to least-specific.
///
/// 1. A pre-built model in the config.
/// 2. An explicit API key → OpenAI-compatible HTTP backend.
/// 3. A named `edgequake-llm` provider (credentials from its env vars).
/// 4. Otherwise [`MenuError::MissingCredential`].
pub fn resolve_model(
    config: &ExtractionConfig,
    api_key: Option<&ApiKey>,
) -> Result<Arc<dyn VisionModel>, MenuError> {
    if let Some(ref model) = config.vision_model {
        return Ok(Arc::clone(model));
    }

    if let Some(key) = api_key {
        let model = OpenAiVisionModel::from_config(key.clone(), config)?;
        return Ok(Arc::new(model));
    }

    if let Some(ref name) = config.provider_name {
        let model_id = config.model_id();
        let provider = ProviderFactory::create_llm_provider(name, model_id).map_err(|e| {
            MenuError::ProviderNotConfigured {
                provider: name.clone(),
                hint: format!("{e}"),
            }
        })?;
        return Ok(Arc::new(ProviderVisionModel::new(
            format!("{name}/{model_id}"),
            provider,
        )));
    }

    Err(MenuError::MissingCredential)
}
