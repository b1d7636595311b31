//! Results of an extraction run.

use crate::error::ExtractionError;
use crate::export::MenuDocument;
use crate::menu::MenuItem;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Outcome for one selected image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    /// 1-based image number.
    pub image: usize,
    pub items: Vec<MenuItem>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub retries: u32,
    /// Set when the image contributed no items because something failed.
    pub error: Option<ExtractionError>,
}

impl ImageResult {
    pub(crate) fn failed(image: usize, start: Instant, retries: u32, error: ExtractionError) -> Self {
        Self {
            image,
            items: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: start.elapsed().as_millis() as u64,
            retries,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate numbers for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_images: usize,
    pub processed_images: usize,
    pub failed_images: usize,
    pub total_items: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Everything one "process" action produced, per image and in total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// One entry per selected image, in ascending image order.
    pub images: Vec<ImageResult>,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    pub(crate) fn from_results(images: Vec<ImageResult>, total_images: usize, total_duration_ms: u64) -> Self {
        let failed_images = images.iter().filter(|r| !r.is_ok()).count();
        let stats = ExtractionStats {
            total_images,
            processed_images: images.len() - failed_images,
            failed_images,
            total_items: images.iter().map(|r| r.items.len()).sum(),
            total_input_tokens: images.iter().map(|r| r.input_tokens).sum(),
            total_output_tokens: images.iter().map(|r| r.output_tokens).sum(),
            total_duration_ms,
        };
        Self { images, stats }
    }

    /// All items, grouped by image in ascending order, each group in reply order.
    pub fn items(&self) -> Vec<MenuItem> {
        self.images
            .iter()
            .flat_map(|r| r.items.iter().cloned())
            .collect()
    }

    /// Per-image failures to show next to the results.
    pub fn warnings(&self) -> impl Iterator<Item = &ExtractionError> {
        self.images.iter().filter_map(|r| r.error.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.images.iter().all(|r| r.items.is_empty())
    }

    /// Build the editable document from the concatenated items.
    pub fn to_document(&self) -> MenuDocument {
        MenuDocument::new(self.items())
    }
}
