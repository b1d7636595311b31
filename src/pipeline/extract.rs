//! Model interaction: send one persisted image to the vision model and parse
//! the reply into menu items.
//!
//! All prompt text lives in [`crate::prompts`]; all reply parsing lives in
//! [`crate::menu`]. This module owns the retry loop and turns every failure
//! into a per-image [`ExtractionError`] instead of propagating it.
//!
//! ## Retry Strategy
//!
//! Only errors that [`ModelError::is_retryable`] reports as transient are
//! retried, with exponential backoff (`retry_backoff_ms * 2^(attempt-1)`). A
//! 429 carrying `Retry-After` waits at least that long. With the default of
//! zero retries each image gets exactly one attempt.

use super::encode;
use super::persist::PageImage;
use crate::config::ExtractionConfig;
use crate::error::{ExtractionError, ModelError};
use crate::menu::parse_menu_reply;
use crate::model::{VisionModel, VisionRequest};
use crate::output::ImageResult;
use crate::prompts::{MENU_SYSTEM_PROMPT, USER_INSTRUCTION};
use edgequake_llm::ImageData;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Extract the menu items visible in one image.
///
/// Always returns an [`ImageResult`]; a failed image carries its error and an
/// empty item list so the remaining images can still be processed.
pub async fn extract_image(
    model: &dyn VisionModel,
    image: &PageImage,
    config: &ExtractionConfig,
) -> ImageResult {
    let start = Instant::now();

    let data = match encode::encode_image_file(&image.path).await {
        Ok(data) => data,
        Err(e) => {
            warn!("Image {}: could not read {}: {}", image.index, image.path.display(), e);
            return ImageResult::failed(
                image.index,
                start,
                0,
                ExtractionError::ImageUnreadable {
                    image: image.index,
                    detail: e.to_string(),
                },
            );
        }
    };

    let request = build_request(data, config);

    let (reply, retries) = match complete_with_retries(model, image.index, &request, config).await
    {
        Ok(done) => done,
        Err((retries, e)) => {
            return ImageResult::failed(
                image.index,
                start,
                retries,
                ExtractionError::ApiFailed {
                    image: image.index,
                    retries,
                    detail: e.to_string(),
                },
            );
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    debug!(
        "Image {}: {} input tokens, {} output tokens, {}ms",
        image.index, reply.input_tokens, reply.output_tokens, duration_ms
    );

    let parsed = parse_menu_reply(&reply.content, image.index, config.price_pairing);
    if let Err(ref e) = parsed {
        warn!("{}", e);
    }
    let (items, error) = match parsed {
        Ok(items) => (items, None),
        Err(e) => (Vec::new(), Some(e)),
    };

    ImageResult {
        image: image.index,
        items,
        input_tokens: reply.input_tokens,
        output_tokens: reply.output_tokens,
        duration_ms,
        retries,
        error,
    }
}

/// Build the request: system prompt (or override), instruction and image.
pub fn build_request(image: ImageData, config: &ExtractionConfig) -> VisionRequest {
    VisionRequest {
        system_prompt: config
            .system_prompt
            .clone()
            .unwrap_or_else(|| MENU_SYSTEM_PROMPT.to_string()),
        instruction: USER_INSTRUCTION.to_string(),
        image,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

async fn complete_with_retries(
    model: &dyn VisionModel,
    index: usize,
    request: &VisionRequest,
    config: &ExtractionConfig,
) -> Result<(crate::model::VisionReply, u32), (u32, ModelError)> {
    let mut attempt: u32 = 0;
    loop {
        match model.complete(request).await {
            Ok(reply) => return Ok((reply, attempt)),
            Err(e) => {
                warn!(
                    "Image {}: attempt {} via '{}' failed: {}",
                    index,
                    attempt + 1,
                    model.name(),
                    e
                );
                if attempt >= config.max_retries || !e.is_retryable() {
                    return Err((attempt, e));
                }
                attempt += 1;
                let backoff = backoff_for(&e, attempt, config.retry_backoff_ms);
                warn!(
                    "Image {}: retry {}/{} after {}ms",
                    index, attempt, config.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based).
fn backoff_for(error: &ModelError, attempt: u32, base_ms: u64) -> u64 {
    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    match error {
        ModelError::RateLimited {
            retry_after_secs: Some(secs),
            ..
        } => exponential.max(secs.saturating_mul(1000)),
        _ => exponential,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VisionReply;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted(Mutex<VecDeque<Result<VisionReply, ModelError>>>);

    impl Scripted {
        fn new(replies: Vec<Result<VisionReply, ModelError>>) -> Self {
            Self(Mutex::new(replies.into()))
        }
        fn remaining(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    impl VisionModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn complete<'a>(
            &'a self,
            _request: &'a VisionRequest,
        ) -> BoxFuture<'a, Result<VisionReply, ModelError>> {
            let next = self
                .0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Transport("script exhausted".into())));
            Box::pin(async move { next })
        }
    }

    fn page_on_disk(dir: &std::path::Path) -> PageImage {
        let path = dir.join("image_1.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        PageImage { index: 1, path }
    }

    fn fast_config(retries: u32) -> ExtractionConfig {
        ExtractionConfig::builder()
            .max_retries(retries)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn parses_items_from_noisy_reply() {
        let dir = tempfile::tempdir().unwrap();
        let model = Scripted::new(vec![Ok(VisionReply::text(
            "Sure! [{\"name\":\"Tea\",\"prices\":[10],\"priceLabels\":[\"Cup\"],\"description\":\"hot tea\",\"labels\":[\"veg\"]}] Enjoy.",
        ))]);
        let result = extract_image(&model, &page_on_disk(dir.path()), &fast_config(0)).await;
        assert!(result.error.is_none());
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].name, "Tea");
    }

    #[tokio::test]
    async fn no_array_means_no_items() {
        let dir = tempfile::tempdir().unwrap();
        let model = Scripted::new(vec![Ok(VisionReply::text("No menu here."))]);
        let result = extract_image(&model, &page_on_disk(dir.path()), &fast_config(0)).await;
        assert!(result.error.is_none());
        assert!(result.items.is_empty());
    }

    #[tokio::test]
    async fn single_attempt_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let model = Scripted::new(vec![
            Err(ModelError::Timeout { secs: 60 }),
            Ok(VisionReply::text("[]")),
        ]);
        let result = extract_image(&model, &page_on_disk(dir.path()), &fast_config(0)).await;
        assert!(matches!(result.error, Some(ExtractionError::ApiFailed { retries: 0, .. })));
        assert_eq!(model.remaining(), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let dir = tempfile::tempdir().unwrap();
        let model = Scripted::new(vec![
            Err(ModelError::Timeout { secs: 60 }),
            Ok(VisionReply::text("[{\"name\":\"Dosa\"}]")),
        ]);
        let result = extract_image(&model, &page_on_disk(dir.path()), &fast_config(2)).await;
        assert!(result.error.is_none());
        assert_eq!(result.retries, 1);
        assert_eq!(result.items[0].name, "Dosa");
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let model = Scripted::new(vec![
            Err(ModelError::Auth {
                provider: "openai".into(),
                detail: "bad key".into(),
            }),
            Ok(VisionReply::text("[]")),
        ]);
        let result = extract_image(&model, &page_on_disk(dir.path()), &fast_config(3)).await;
        assert!(matches!(result.error, Some(ExtractionError::ApiFailed { .. })));
        assert_eq!(model.remaining(), 1);
    }

    #[tokio::test]
    async fn unreadable_image_skips_the_model() {
        let model = Scripted::new(vec![Ok(VisionReply::text("[]"))]);
        let missing = PageImage {
            index: 4,
            path: "/no/such/image_4.jpg".into(),
        };
        let result = extract_image(&model, &missing, &fast_config(0)).await;
        assert!(matches!(
            result.error,
            Some(ExtractionError::ImageUnreadable { image: 4, .. })
        ));
        assert_eq!(model.remaining(), 1);
    }

    #[test]
    fn backoff_grows_and_honours_retry_after() {
        let timeout = ModelError::Timeout { secs: 1 };
        assert_eq!(backoff_for(&timeout, 1, 500), 500);
        assert_eq!(backoff_for(&timeout, 3, 500), 2000);

        let limited = ModelError::RateLimited {
            provider: "openai".into(),
            retry_after_secs: Some(5),
        };
        assert_eq!(backoff_for(&limited, 1, 500), 5000);
    }

    #[test]
    fn request_uses_prompt_override() {
        let config = ExtractionConfig::builder()
            .system_prompt("Only drinks.")
            .build()
            .unwrap();
        let request = build_request(ImageData::new("AAAA".to_string(), "image/jpeg"), &config);
        assert_eq!(request.system_prompt, "Only drinks.");
        assert_eq!(request.instruction, USER_INSTRUCTION);
        assert_eq!(request.max_tokens, 4096);
    }
}
