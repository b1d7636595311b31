//! Persist rasterised pages as `image_<n>.jpg` inside the session workspace.
//!
//! Numbering is 1-based and follows page order. An existing file with the same
//! name is overwritten, so re-uploading a document refreshes its images in
//! place; [`remove_stale_images`] drops pages the new document no longer has.

use crate::error::MenuError;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One persisted page image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    /// 1-based position in the document.
    pub index: usize,
    pub path: PathBuf,
}

impl PageImage {
    /// Caption shown next to the image, e.g. `Image 2`.
    pub fn caption(&self) -> String {
        format!("Image {}", self.index)
    }
}

/// File name for the page at 1-based `index`.
pub fn image_file_name(index: usize) -> String {
    format!("image_{index}.jpg")
}

/// Encode each page as JPEG into `dir`.
pub async fn persist_images(
    images: Vec<DynamicImage>,
    dir: &Path,
) -> Result<Vec<PageImage>, MenuError> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || persist_blocking(images, &dir))
        .await
        .map_err(|e| MenuError::Internal(format!("Persist task panicked: {}", e)))?
}

fn persist_blocking(images: Vec<DynamicImage>, dir: &Path) -> Result<Vec<PageImage>, MenuError> {
    images
        .into_iter()
        .enumerate()
        .map(|(i, image)| {
            let index = i + 1;
            let path = dir.join(image_file_name(index));
            // JPEG has no alpha channel.
            DynamicImage::ImageRgb8(image.to_rgb8())
                .save_with_format(&path, ImageFormat::Jpeg)
                .map_err(|e| MenuError::Workspace {
                    path: path.clone(),
                    source: std::io::Error::other(e),
                })?;
            debug!("Persisted {}", path.display());
            Ok(PageImage { index, path })
        })
        .collect()
}

/// Delete `image_<n>.jpg` files in `dir` with `n > keep`. Returns how many
/// were removed.
pub async fn remove_stale_images(dir: &Path, keep: usize) -> Result<usize, MenuError> {
    let workspace_err = |source| MenuError::Workspace {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(workspace_err)?;
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await.map_err(workspace_err)? {
        let name = entry.file_name();
        let stale = name
            .to_str()
            .and_then(|n| n.strip_prefix("image_"))
            .and_then(|n| n.strip_suffix(".jpg"))
            .and_then(|n| n.parse::<usize>().ok())
            .is_some_and(|n| n > keep);
        if stale {
            tokio::fs::remove_file(entry.path())
                .await
                .map_err(workspace_err)?;
            debug!("Removed stale {}", entry.path().display());
            removed += 1;
        }
    }
    Ok(removed)
}
