//! Progress-callback trait for per-image extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through the selected images. The CLI uses it
//! to drive a progress bar; the web UI does not need it.
//!
//! # Example
//!
//! ```rust
//! use menu_vision::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     items: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, _image: usize, _total: usize, item_count: usize) {
//!         self.items.fetch_add(item_count, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { items: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each image.
///
/// Images are processed one at a time, so events arrive in order. All methods
/// default to no-ops so callers only override what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first image is sent.
    fn on_run_start(&self, total_images: usize) {
        let _ = total_images;
    }

    /// Called just before the model request is sent for an image.
    ///
    /// `image` is the 1-based index shown to the user as "Image N".
    fn on_image_start(&self, image: usize, total_images: usize) {
        let _ = (image, total_images);
    }

    /// Called when an image's reply was parsed.
    fn on_image_complete(&self, image: usize, total_images: usize, item_count: usize) {
        let _ = (image, total_images, item_count);
    }

    /// Called when an image contributed no items because of an error.
    fn on_image_error(&self, image: usize, total_images: usize, error: String) {
        let _ = (image, total_images, error);
    }

    /// Called once after every selected image has been attempted.
    fn on_run_complete(&self, total_images: usize, success_count: usize) {
        let _ = (total_images, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
