//! # menu-vision
//!
//! Turn photographed or scanned restaurant menus into structured data using a
//! vision language model.
//!
//! ## Why this crate?
//!
//! Menus mix columns, multiple prices per dish ("Half / Full"), badges and
//! decorative fonts. Instead of OCR plus heuristics, each page is rasterised
//! and shown to a vision model that returns a JSON array of items. The items
//! are flattened into an editable table with one `Price (<label>)` column per
//! distinct price label, and exported as `menu_items.json` and
//! `menu_items.csv`.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / JPEG / PNG
//!  │
//!  ├─ 1. Input    allow-list check, or resolve a local path / URL
//!  ├─ 2. Render   rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Persist  image_<n>.jpg in a per-session workspace
//!  ├─ 4. Extract  one vision call per selected image, JSON array parsed
//!  ├─ 5. Flatten  items → table with Price (<label>) union columns
//!  └─ 6. Export   original items as JSON, edited table as CSV
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use menu_vision::{extract_menu, ApiKey, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::default();
//!     let key = ApiKey::new(std::env::var("OPENAI_API_KEY")?);
//!     let output = extract_menu("menu.pdf", key, &config).await?;
//!     let document = output.to_document();
//!     document.write_to_dir(std::path::Path::new("out")).await?;
//!     eprintln!("{} items", document.items().len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `menu-vision` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | Enables [`server`], the browser UI built on axum |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod menu;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
pub mod table;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, ImageSelection, PricePairing};
pub use error::{ExtractionError, MenuError, ModelError};
pub use export::{MenuDocument, CSV_FILE_NAME, JSON_FILE_NAME};
pub use extract::{extract_menu, inspect, process_images, MenuPreview, PageInfo};
pub use menu::{parse_menu_reply, MenuItem, Price};
pub use model::{ApiKey, OpenAiVisionModel, ProviderVisionModel, VisionModel, VisionReply, VisionRequest};
pub use output::{ExtractionOutput, ExtractionStats, ImageResult};
pub use pipeline::input::{MediaType, Upload};
pub use pipeline::persist::PageImage;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::Session;
pub use table::{CellEdit, MenuTable};
