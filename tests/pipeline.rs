//! Full-flow tests: upload → rasterise → persist → extract → flatten → export,
//! with a scripted vision model standing in for the network.

use futures::future::BoxFuture;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use menu_vision::pipeline::persist::persist_images;
use menu_vision::{
    process_images, ExtractionConfig, ExtractionError, ExtractionProgressCallback, ImageSelection,
    MenuError, ModelError, PricePairing, Session, Upload, VisionModel, VisionReply, VisionRequest,
};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Replies in order; records how many requests it saw.
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<VisionReply, ModelError>>>,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<VisionReply, ModelError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl VisionModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete<'a>(
        &'a self,
        request: &'a VisionRequest,
    ) -> BoxFuture<'a, Result<VisionReply, ModelError>> {
        assert_eq!(request.image.mime_type, "image/jpeg");
        *self.calls.lock().unwrap() += 1;
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Transport("no scripted reply left".into())));
        Box::pin(async move { next })
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl ExtractionProgressCallback for EventLog {
    fn on_run_start(&self, total_images: usize) {
        self.0.lock().unwrap().push(format!("start {total_images}"));
    }
    fn on_image_complete(&self, image: usize, _total: usize, item_count: usize) {
        self.0.lock().unwrap().push(format!("ok {image} {item_count}"));
    }
    fn on_image_error(&self, image: usize, _total: usize, _error: String) {
        self.0.lock().unwrap().push(format!("err {image}"));
    }
    fn on_run_complete(&self, total_images: usize, success_count: usize) {
        self.0
            .lock()
            .unwrap()
            .push(format!("done {success_count}/{total_images}"));
    }
}

fn page(shade: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([shade, shade, shade])))
}

fn png_upload(name: &str) -> Upload {
    let mut buf = Vec::new();
    page(120)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    Upload::new(name, "image/png", buf).unwrap()
}

fn reply(json: &str) -> Result<VisionReply, ModelError> {
    Ok(VisionReply::text(json))
}

fn config_with(model: Arc<ScriptedModel>) -> ExtractionConfig {
    ExtractionConfig::builder()
        .vision_model(model)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

const TEA: &str = r#"Here you go:
[{"name":"Tea","prices":[10],"priceLabels":["Cup"],"description":"hot tea","labels":["veg"]}]"#;

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_image_contributes_nothing_and_order_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let images = persist_images(vec![page(10), page(20), page(30)], dir.path())
        .await
        .unwrap();

    let model = ScriptedModel::new(vec![
        reply(r#"[{"name":"Idli","prices":[40],"priceLabels":["Plate"],"description":"steamed","labels":["veg"]},
                  {"name":"Vada","prices":[30],"priceLabels":["Plate"],"description":"fried","labels":["veg"]}]"#),
        Err(ModelError::Http {
            provider: "scripted".into(),
            status: 500,
            body: "boom".into(),
        }),
        reply(r#"[{"name":"Lassi","prices":[50, 80],"priceLabels":["Small","Large"],"description":"yoghurt drink","labels":[]}]"#),
    ]);
    let log = Arc::new(EventLog::default());
    let config = ExtractionConfig::builder()
        .retry_backoff_ms(1)
        .progress_callback(log.clone())
        .build()
        .unwrap();

    let output = process_images(model.as_ref(), &images, &config).await.unwrap();

    let names: Vec<String> = output.items().into_iter().map(|i| i.name).collect();
    assert_eq!(names, ["Idli", "Vada", "Lassi"]);
    assert_eq!(output.stats.failed_images, 1);
    assert!(matches!(
        output.warnings().next(),
        Some(ExtractionError::ApiFailed { image: 2, retries: 0, .. })
    ));
    assert_eq!(
        *log.0.lock().unwrap(),
        ["start 3", "ok 1 2", "err 2", "ok 3 1", "done 2/3"]
    );

    let table = output.to_document().table().clone();
    assert_eq!(
        table.columns(),
        ["Name", "Description", "Labels", "Price (Plate)", "Price (Small)", "Price (Large)"]
    );
    assert_eq!(table.cell(2, "Price (Plate)"), Some(""));
    assert_eq!(table.cell(2, "Price (Large)"), Some("80"));
}

#[tokio::test]
async fn selection_limits_model_calls() {
    let dir = tempfile::tempdir().unwrap();
    let images = persist_images(vec![page(1), page(2), page(3)], dir.path())
        .await
        .unwrap();
    let model = ScriptedModel::new(vec![reply("[]"), reply(TEA)]);
    let config = ExtractionConfig::builder()
        .images(ImageSelection::Set(vec![3, 1, 3]))
        .build()
        .unwrap();

    let output = process_images(model.as_ref(), &images, &config).await.unwrap();
    assert_eq!(model.calls(), 2);
    let order: Vec<usize> = output.images.iter().map(|r| r.image).collect();
    assert_eq!(order, [1, 3]);
    assert_eq!(output.items()[0].name, "Tea");
}

#[tokio::test]
async fn session_flow_exports_original_json_and_edited_csv() {
    let root = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![reply(TEA)]);
    let config = config_with(model.clone());

    let mut session = Session::new(root.path());
    let images = session.upload(png_upload("menu.png"), &config).await.unwrap();
    assert_eq!(images.len(), 1);
    assert!(images[0].path.ends_with("image_1.jpg"));

    let output = session.process(&config).await.unwrap();
    assert_eq!(output.stats.total_items, 1);

    let doc = session.document_mut().unwrap();
    doc.table_mut().set_cell(0, "Price (Cup)", "12").unwrap();

    let out = tempfile::tempdir().unwrap();
    let (json_path, csv_path) = doc.write_to_dir(out.path()).await.unwrap();

    let json = std::fs::read_to_string(json_path).unwrap();
    let items: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(items[0]["prices"][0], 10);
    assert_eq!(items[0]["priceLabels"][0], "Cup");

    let csv = std::fs::read_to_string(csv_path).unwrap();
    assert_eq!(
        csv,
        "Name,Description,Labels,Price (Cup)\nTea,hot tea,veg,12\n"
    );

    let dir = session.images()[0].path.parent().unwrap().to_path_buf();
    session.end().unwrap();
    assert!(!dir.exists());
}

#[tokio::test]
async fn mismatched_prices_reject_the_image_under_strict_pairing() {
    let root = tempfile::tempdir().unwrap();
    let bad = r#"[{"name":"Thali","prices":[150,250],"priceLabels":["Half"],"description":"meal","labels":[]}]"#;

    let strict = ScriptedModel::new(vec![reply(bad)]);
    let mut session = Session::new(root.path());
    let config = config_with(strict);
    session.upload(png_upload("menu.png"), &config).await.unwrap();
    let output = session.process(&config).await.unwrap();
    assert!(output.is_empty());
    assert!(session.document().is_none());
    assert!(matches!(
        session.warnings(),
        [ExtractionError::MalformedRecord { prices: 2, labels: 1, .. }]
    ));

    let lenient = ScriptedModel::new(vec![reply(bad)]);
    let config = ExtractionConfig::builder()
        .vision_model(lenient)
        .price_pairing(PricePairing::Truncate)
        .build()
        .unwrap();
    let output = session.process(&config).await.unwrap();
    let table = output.to_document().table().clone();
    assert_eq!(table.columns().len(), 4);
    assert_eq!(table.cell(0, "Price (Half)"), Some("150"));
}

#[tokio::test]
async fn unsupported_upload_never_reaches_the_rasteriser() {
    let err = Upload::new("menu.txt", "text/plain", b"Tea ... 10".to_vec()).unwrap_err();
    assert!(matches!(err, MenuError::UnsupportedFormat { .. }));
}

#[tokio::test]
async fn missing_credential_makes_no_calls() {
    let root = tempfile::tempdir().unwrap();
    let config = ExtractionConfig::default();
    let mut session = Session::new(root.path());
    session.upload(png_upload("menu.png"), &config).await.unwrap();
    assert!(matches!(
        session.process(&config).await,
        Err(MenuError::MissingCredential)
    ));
}

#[tokio::test]
async fn retries_recover_transient_failures() {
    let root = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        Err(ModelError::RateLimited {
            provider: "scripted".into(),
            retry_after_secs: None,
        }),
        reply(TEA),
    ]);
    let config = ExtractionConfig::builder()
        .vision_model(model.clone())
        .max_retries(2)
        .retry_backoff_ms(1)
        .build()
        .unwrap();

    let mut session = Session::new(root.path());
    session.upload(png_upload("menu.png"), &config).await.unwrap();
    let output = session.process(&config).await.unwrap();
    assert_eq!(model.calls(), 2);
    assert_eq!(output.images[0].retries, 1);
    assert_eq!(output.stats.total_items, 1);
}
