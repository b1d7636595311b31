//! One user's state across upload, processing, review and export.
//!
//! A [`Session`] owns the API key (in memory only), the workspace directory
//! with the persisted page images, the name of the last upload and the
//! current [`MenuDocument`]. Nothing is shared between sessions.

use crate::config::ExtractionConfig;
use crate::error::{ExtractionError, MenuError};
use crate::export::MenuDocument;
use crate::extract::process_images;
use crate::model::{resolve_model, ApiKey};
use crate::output::ExtractionOutput;
use crate::pipeline::input::Upload;
use crate::pipeline::persist::{persist_images, remove_stale_images, PageImage};
use crate::pipeline::render;
use crate::workspace::SessionWorkspace;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    api_key: Option<ApiKey>,
    workspace: SessionWorkspace,
    last_upload: Option<String>,
    images: Vec<PageImage>,
    document: Option<MenuDocument>,
    warnings: Vec<ExtractionError>,
}

impl Session {
    /// A fresh session whose workspace will live under `workspace_root`.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_key: None,
            workspace: SessionWorkspace::new(workspace_root),
            last_upload: None,
            images: Vec::new(),
            document: None,
            warnings: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Replace the key; `None` clears it.
    pub fn set_api_key(&mut self, key: Option<ApiKey>) {
        self.api_key = key;
    }

    pub fn api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Name of the most recent accepted upload.
    pub fn last_upload(&self) -> Option<&str> {
        self.last_upload.as_deref()
    }

    /// Persisted page images of the current upload, in page order.
    pub fn images(&self) -> &[PageImage] {
        &self.images
    }

    /// Image by 1-based index.
    pub fn image(&self, index: usize) -> Option<&PageImage> {
        self.images.iter().find(|img| img.index == index)
    }

    pub fn document(&self) -> Option<&MenuDocument> {
        self.document.as_ref()
    }

    pub fn document_mut(&mut self) -> Option<&mut MenuDocument> {
        self.document.as_mut()
    }

    /// Per-image failures from the last processing run.
    pub fn warnings(&self) -> &[ExtractionError] {
        &self.warnings
    }

    /// Rasterise and persist an upload.
    ///
    /// A file with a different name than the previous upload gets a fresh
    /// workspace; the same name reuses the directory and overwrites its images.
    /// Results of any earlier run are discarded.
    pub async fn upload(
        &mut self,
        upload: Upload,
        config: &ExtractionConfig,
    ) -> Result<&[PageImage], MenuError> {
        if self.last_upload.as_deref() != Some(upload.file_name.as_str()) {
            self.workspace.release()?;
        }
        self.images.clear();
        self.document = None;
        self.warnings.clear();
        self.last_upload = Some(upload.file_name.clone());

        let pages = render::rasterize(&upload, config).await?;
        let dir = self.workspace.acquire()?.to_path_buf();
        self.images = persist_images(pages, &dir).await?;
        remove_stale_images(&dir, self.images.len()).await?;

        info!(
            "Session {}: '{}' → {} images",
            self.id,
            upload.file_name,
            self.images.len()
        );
        Ok(&self.images)
    }

    /// Extract items from the images chosen by `config.images`.
    ///
    /// Requires a credential before anything is sent. The returned output
    /// also becomes the session's editable document, replacing any previous
    /// one and its edits.
    pub async fn process(&mut self, config: &ExtractionConfig) -> Result<ExtractionOutput, MenuError> {
        let model = resolve_model(config, self.api_key.as_ref())?;
        let output = process_images(model.as_ref(), &self.images, config).await?;

        self.warnings = output.warnings().cloned().collect();
        self.document = (!output.is_empty()).then(|| output.to_document());
        Ok(output)
    }

    /// Forget everything and delete the workspace.
    pub fn end(&mut self) -> Result<(), MenuError> {
        self.api_key = None;
        self.last_upload = None;
        self.images.clear();
        self.document = None;
        self.warnings.clear();
        self.workspace.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(name: &str) -> Upload {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        Upload::new(name, "image/png", buf).unwrap()
    }

    #[tokio::test]
    async fn process_without_key_is_missing_credential() {
        let root = tempfile::tempdir().unwrap();
        let config = ExtractionConfig::default();
        let mut session = Session::new(root.path());
        session.upload(png("menu.png"), &config).await.unwrap();

        let err = session.process(&config).await.unwrap_err();
        assert!(matches!(err, MenuError::MissingCredential));
        assert!(session.document().is_none());
    }

    #[tokio::test]
    async fn same_name_reuses_workspace_new_name_replaces_it() {
        let root = tempfile::tempdir().unwrap();
        let config = ExtractionConfig::default();
        let mut session = Session::new(root.path());

        session.upload(png("menu.png"), &config).await.unwrap();
        let first = session.images()[0].path.clone();

        session.upload(png("menu.png"), &config).await.unwrap();
        assert_eq!(session.images()[0].path, first);

        session.upload(png("other.png"), &config).await.unwrap();
        let third = session.images()[0].path.clone();
        assert_ne!(third.parent(), first.parent());
        assert!(!first.exists());
        assert!(third.ends_with("image_1.jpg"));
    }

    #[tokio::test]
    async fn shorter_reupload_leaves_no_old_pages() {
        let root = tempfile::tempdir().unwrap();
        let config = ExtractionConfig::default();
        let mut session = Session::new(root.path());
        session.upload(png("menu.png"), &config).await.unwrap();
        let dir = session.images()[0].path.parent().unwrap().to_path_buf();

        // Pretend the previous upload of this name had three pages.
        std::fs::copy(dir.join("image_1.jpg"), dir.join("image_2.jpg")).unwrap();
        std::fs::copy(dir.join("image_1.jpg"), dir.join("image_3.jpg")).unwrap();

        session.upload(png("menu.png"), &config).await.unwrap();
        let mut files: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        files.sort();
        assert_eq!(files, ["image_1.jpg"]);
    }

    #[tokio::test]
    async fn end_removes_workspace_and_key() {
        let root = tempfile::tempdir().unwrap();
        let config = ExtractionConfig::default();
        let mut session = Session::new(root.path());
        session.set_api_key(ApiKey::new("sk-test"));
        session.upload(png("menu.png"), &config).await.unwrap();
        let dir = session.images()[0].path.parent().unwrap().to_path_buf();

        session.end().unwrap();
        assert!(!dir.exists());
        assert!(!session.has_api_key());
        assert!(session.images().is_empty());
        assert!(session.image(1).is_none());
    }
}
