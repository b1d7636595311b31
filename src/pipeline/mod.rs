//! Pipeline stages for menu extraction.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the rasteriser or model backend can change without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ persist ──▶ encode ──▶ extract
//! (upload)   (pdfium)   (JPEG)     (base64)   (VLM + parse)
//! ```
//!
//! 1. [`input`]   — validate the upload's type against the allow-list, or load
//!    a local path / URL
//! 2. [`render`]  — rasterise PDF pages or decode the single image; runs in
//!    `spawn_blocking` because pdfium and image decoding are CPU-bound
//! 3. [`persist`] — write `image_<n>.jpg` files into the session workspace
//! 4. [`encode`]  — read a persisted image back and base64-wrap it
//! 5. [`extract`] — send one image to the model and parse its reply; the only
//!    stage with network I/O

pub mod encode;
pub mod extract;
pub mod input;
pub mod persist;
pub mod render;
