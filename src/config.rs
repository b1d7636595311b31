//! Configuration types for menu extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The same config drives the CLI and the
//! web UI so both surfaces behave identically.

use crate::error::MenuError;
use crate::model::VisionModel;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for a menu extraction run.
///
/// # Example
/// ```rust
/// use menu_vision::{ExtractionConfig, ImageSelection};
///
/// let config = ExtractionConfig::builder()
///     .model("gpt-4o-mini")
///     .images(ImageSelection::Range(1, 2))
///     .build()
///     .unwrap();
/// assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Vision model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// `edgequake-llm` provider name (e.g. "anthropic", "gemini", "ollama").
    ///
    /// Used only when no API key is supplied for the session; the provider
    /// then reads its own credentials from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed vision model. Takes precedence over everything else.
    pub vision_model: Option<Arc<dyn VisionModel>>,

    /// Base URL of the OpenAI-compatible API. Default: [`DEFAULT_API_BASE`].
    pub api_base_url: String,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcribing prices is not a creative task; low values keep the model
    /// faithful to what is printed.
    pub temperature: f32,

    /// Maximum tokens the model may generate per image. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts after a retryable model failure. Default: 0.
    ///
    /// Each selected image is tried exactly once unless this is raised.
    /// Non-retryable failures (bad key, 4xx) are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Longest edge of a rasterised PDF page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses [`crate::prompts::MENU_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Which persisted images to send to the model. Default: all.
    pub images: ImageSelection,

    /// How mismatched `prices` / `priceLabels` lengths are handled. Default: strict.
    pub price_pairing: PricePairing,

    /// Directory under which session workspaces are created. Default: system temp dir.
    pub workspace_root: Option<PathBuf>,

    /// Receives per-image progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            vision_model: None,
            api_base_url: DEFAULT_API_BASE.to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            max_rendered_pixels: 2000,
            password: None,
            system_prompt: None,
            images: ImageSelection::default(),
            price_pairing: PricePairing::default(),
            workspace_root: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field(
                "vision_model",
                &self.vision_model.as_ref().map(|_| "<dyn VisionModel>"),
            )
            .field("api_base_url", &self.api_base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("images", &self.images)
            .field("price_pairing", &self.price_pairing)
            .field("workspace_root", &self.workspace_root)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model identifier to request, falling back to [`DEFAULT_MODEL`].
    pub fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// The workspace root, falling back to the system temp dir.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn vision_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.config.vision_model = Some(model);
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn images(mut self, selection: ImageSelection) -> Self {
        self.config.images = selection;
        self
    }

    pub fn price_pairing(mut self, pairing: PricePairing) -> Self {
        self.config.price_pairing = pairing;
        self
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = Some(root.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, MenuError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(MenuError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(MenuError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if !(c.api_base_url.starts_with("http://") || c.api_base_url.starts_with("https://")) {
            return Err(MenuError::InvalidConfig(format!(
                "API base URL must be http(s), got '{}'",
                c.api_base_url
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Specifies which persisted images are sent to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSelection {
    /// Process every image (default).
    #[default]
    All,
    /// Process a single image (1-indexed).
    Single(usize),
    /// Process a contiguous range of images (1-indexed, inclusive).
    Range(usize, usize),
    /// Process specific images (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl ImageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed positions.
    pub fn to_indices(&self, total_images: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            ImageSelection::All => (0..total_images).collect(),
            ImageSelection::Single(n) => {
                if *n >= 1 && *n <= total_images {
                    vec![n - 1]
                } else {
                    vec![]
                }
            }
            ImageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_images);
                (s..e).collect()
            }
            ImageSelection::Set(images) => images
                .iter()
                .filter(|&&n| n >= 1 && n <= total_images)
                .map(|n| n - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Parse `all`, `3`, `1-4` or `1,3,5`.
    pub fn parse(s: &str) -> Result<Self, MenuError> {
        let s = s.trim().to_lowercase();
        let invalid = |detail: String| MenuError::InvalidConfig(detail);

        if s == "all" {
            return Ok(ImageSelection::All);
        }

        if let Some((start, end)) = s.split_once('-') {
            let start: usize = start
                .trim()
                .parse()
                .map_err(|_| invalid(format!("invalid start image in '{s}'")))?;
            let end: usize = end
                .trim()
                .parse()
                .map_err(|_| invalid(format!("invalid end image in '{s}'")))?;
            if start < 1 || start > end {
                return Err(invalid(format!(
                    "invalid image range '{start}-{end}': images are 1-indexed and start must be <= end"
                )));
            }
            return Ok(ImageSelection::Range(start, end));
        }

        if s.contains(',') {
            let images = s
                .split(',')
                .map(|n| {
                    n.trim()
                        .parse::<usize>()
                        .ok()
                        .filter(|&n| n >= 1)
                        .ok_or_else(|| invalid(format!("invalid image number '{}'", n.trim())))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(ImageSelection::Set(images));
        }

        match s.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(ImageSelection::Single(n)),
            _ => Err(invalid(format!("invalid image number '{s}'"))),
        }
    }
}

/// Policy for items whose `prices` and `priceLabels` differ in length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PricePairing {
    /// Reject the image's reply as malformed; the image contributes no items. (default)
    #[default]
    Strict,
    /// Keep the item and pair prices with labels up to the shorter length.
    Truncate,
}
