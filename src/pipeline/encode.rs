//! Image encoding: persisted JPEG → base64 wrapped in `ImageData`.
//!
//! Vision APIs accept images as base64 data URIs inside the JSON request body.
//! The bytes are read back from the workspace rather than re-encoded, so the
//! model sees exactly the file the user previewed.
//!
//! `detail: "high"` asks GPT-4-class models for the full tile budget; without
//! it small print such as prices in a narrow column is lost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use tracing::debug;

pub const JPEG_MIME: &str = "image/jpeg";

/// Encode raw JPEG bytes for the vision API.
pub fn encode_jpeg(bytes: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, JPEG_MIME).with_detail("high")
}

/// Read a persisted image and encode it.
pub async fn encode_image_file(path: &Path) -> std::io::Result<ImageData> {
    let bytes = tokio::fs::read(path).await?;
    Ok(encode_jpeg(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_as_base64_jpeg() {
        let data = encode_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]);
        assert_eq!(data.mime_type, "image/jpeg");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), [0xFF, 0xD8, 0xFF, 0xE0]);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = encode_image_file(Path::new("/no/such/image_1.jpg"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
