//! Rasterisation: turn an [`Upload`] into one `DynamicImage` per menu page.
//!
//! A PDF yields one image per page, in page order, rendered with pdfium. A JPEG
//! or PNG yields exactly one image. Both paths run inside `spawn_blocking`:
//! pdfium keeps thread-local state and decoding is CPU-bound, so neither may
//! run on a Tokio worker thread.
//!
//! The longest edge is capped at `max_rendered_pixels` rather than fixing a DPI,
//! so a poster-sized page cannot blow up memory.

use super::input::{MediaType, Upload};
use crate::config::ExtractionConfig;
use crate::error::MenuError;
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable pointing at a pdfium shared library or its directory.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Rasterise the upload into page images, in order.
pub async fn rasterize(
    upload: &Upload,
    config: &ExtractionConfig,
) -> Result<Vec<DynamicImage>, MenuError> {
    let name = upload.file_name.clone();
    let bytes = upload.bytes.clone();
    let media_type = upload.media_type;
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();

    let images = tokio::task::spawn_blocking(move || match media_type {
        MediaType::Pdf => render_pdf_blocking(&name, &bytes, max_pixels, password.as_deref()),
        MediaType::Jpeg => decode_image_blocking(&name, &bytes, ImageFormat::Jpeg),
        MediaType::Png => decode_image_blocking(&name, &bytes, ImageFormat::Png),
    })
    .await
    .map_err(|e| MenuError::Internal(format!("Render task panicked: {}", e)))??;

    if images.is_empty() {
        return Err(MenuError::EmptyDocument {
            name: upload.file_name.clone(),
        });
    }
    Ok(images)
}

/// Bind pdfium from `PDFIUM_LIB_PATH`, the working directory, or the system.
fn bind_pdfium() -> Result<Pdfium, MenuError> {
    let bindings = match std::env::var(PDFIUM_LIB_PATH_ENV) {
        Ok(configured) if !configured.trim().is_empty() => {
            let configured = Path::new(configured.trim());
            if configured.is_dir() {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(configured))
            } else {
                Pdfium::bind_to_library(configured)
            }
        }
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| MenuError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn render_pdf_blocking(
    name: &str,
    bytes: &[u8],
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<DynamicImage>, MenuError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    MenuError::WrongPassword {
                        name: name.to_string(),
                    }
                } else {
                    MenuError::PasswordRequired {
                        name: name.to_string(),
                    }
                }
            } else {
                MenuError::CorruptDocument {
                    name: name.to_string(),
                    detail: err_str,
                }
            }
        })?;

    let pages = document.pages();
    info!("PDF '{}' loaded: {} pages", name, pages.len());

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            MenuError::RasterizationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}

fn decode_image_blocking(
    name: &str,
    bytes: &[u8],
    format: ImageFormat,
) -> Result<Vec<DynamicImage>, MenuError> {
    let image = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        MenuError::CorruptDocument {
            name: name.to_string(),
            detail: e.to_string(),
        }
    })?;
    debug!("Decoded '{}' → {}x{} px", name, image.width(), image.height());
    Ok(vec![image])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn png_upload(width: u32, height: u32) -> Upload {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 10, 10])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        Upload::new("menu.png", "image/png", buf).unwrap()
    }

    #[tokio::test]
    async fn single_image_yields_one_page() {
        let config = ExtractionConfig::default();
        let images = rasterize(&png_upload(12, 8), &config).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!((images[0].width(), images[0].height()), (12, 8));
    }

    #[tokio::test]
    async fn corrupt_image_is_reported() {
        let upload = Upload::new("menu.jpg", "image/jpeg", b"not a jpeg".to_vec()).unwrap();
        let err = rasterize(&upload, &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MenuError::CorruptDocument { ref name, .. } if name == "menu.jpg"));
    }
}
