//! Extraction entry points.
//!
//! [`process_images`] is the core loop shared by the CLI and the web UI: it
//! sends the selected persisted images to the model one at a time, in
//! ascending image order, and collects one [`ImageResult`] per image. Failed
//! images are reported, never fatal.
//!
//! [`extract_menu`] runs the whole flow for a path or URL inside a throwaway
//! [`Session`], and [`inspect`] rasterises without calling any model.

use crate::config::ExtractionConfig;
use crate::error::MenuError;
use crate::model::{ApiKey, VisionModel};
use crate::output::{ExtractionOutput, ImageResult};
use crate::pipeline::{extract, input, render};
use crate::pipeline::persist::{persist_images, PageImage};
use crate::session::Session;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Send the images chosen by `config.images` to `model`, one by one.
///
/// # Errors
/// [`MenuError::NoUpload`] when there are no images at all and
/// [`MenuError::NothingSelected`] when the selection matches none of them.
/// Per-image failures are returned inside the output instead.
pub async fn process_images(
    model: &dyn VisionModel,
    images: &[PageImage],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, MenuError> {
    if images.is_empty() {
        return Err(MenuError::NoUpload);
    }
    let indices = config.images.to_indices(images.len());
    if indices.is_empty() {
        return Err(MenuError::NothingSelected {
            total: images.len(),
        });
    }

    let start = Instant::now();
    let selected = indices.len();
    info!(
        "Extracting menu items from {} of {} images with '{}'",
        selected,
        images.len(),
        model.name()
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(selected);
    }

    let mut results: Vec<ImageResult> = Vec::with_capacity(selected);
    for idx in indices {
        let image = &images[idx];
        if let Some(ref cb) = config.progress_callback {
            cb.on_image_start(image.index, selected);
        }

        let result = extract::extract_image(model, image, config).await;

        if let Some(ref cb) = config.progress_callback {
            match result.error {
                Some(ref e) => cb.on_image_error(image.index, selected, e.to_string()),
                None => cb.on_image_complete(image.index, selected, result.items.len()),
            }
        }
        debug!("Image {}: {} items", image.index, result.items.len());
        results.push(result);
    }

    let output =
        ExtractionOutput::from_results(results, images.len(), start.elapsed().as_millis() as u64);

    info!(
        "Extraction complete: {} items from {}/{} images, {}ms",
        output.stats.total_items,
        output.stats.processed_images,
        selected,
        output.stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(selected, output.stats.processed_images);
    }

    Ok(output)
}

/// Extract a menu from a local file or URL in one call.
///
/// A temporary session workspace holds the page images and is removed before
/// this returns. `api_key` selects the OpenAI-compatible backend; without it
/// the configured model or provider is used.
pub async fn extract_menu(
    input_str: impl AsRef<str>,
    api_key: Option<ApiKey>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, MenuError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    let upload = input::resolve_input(input_str, config.download_timeout_secs).await?;

    let mut session = Session::new(config.workspace_root());
    session.set_api_key(api_key);
    let result = match session.upload(upload, config).await {
        Ok(_) => session.process(config).await,
        Err(e) => Err(e),
    };
    session.end()?;
    result
}

/// Size of one rasterised page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    /// 1-based page number.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Where the page was saved, when saving was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// What an upload rasterises to, without calling any model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuPreview {
    pub file_name: String,
    pub mime_type: String,
    pub pages: Vec<PageInfo>,
}

/// Rasterise a local file or URL and report its pages.
///
/// With `save_to`, the pages are also written there as `image_<n>.jpg`.
/// Does not require an API key.
pub async fn inspect(
    input_str: impl AsRef<str>,
    save_to: Option<&Path>,
    config: &ExtractionConfig,
) -> Result<MenuPreview, MenuError> {
    let upload = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let images = render::rasterize(&upload, config).await?;

    let mut pages: Vec<PageInfo> = images
        .iter()
        .enumerate()
        .map(|(i, img)| PageInfo {
            index: i + 1,
            width: img.width(),
            height: img.height(),
            path: None,
        })
        .collect();

    if let Some(dir) = save_to {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| MenuError::OutputWriteFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;
        for saved in persist_images(images, dir).await? {
            if let Some(page) = pages.get_mut(saved.index - 1) {
                page.path = Some(saved.path);
            }
        }
    }

    Ok(MenuPreview {
        file_name: upload.file_name,
        mime_type: upload.media_type.mime().to_string(),
        pages,
    })
}
