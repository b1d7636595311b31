//! The OpenAI-compatible backend against a local stub of `/chat/completions`.
#![cfg(feature = "server")]

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use menu_vision::{
    ApiKey, ExtractionConfig, ExtractionError, ModelError, OpenAiVisionModel, Session, Upload,
    VisionModel, VisionRequest,
};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Stub {
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn chat(State(stub): State<Stub>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    stub.seen.lock().unwrap().push((auth.clone(), body));

    match auth.as_deref() {
        Some("Bearer sk-good") => Json(json!({
            "choices": [{"message": {"role": "assistant", "content":
                "```json\n[{\"name\":\"Tea\",\"prices\":[10],\"priceLabels\":[\"Cup\"],\"description\":\"hot tea\",\"labels\":[\"veg\"]}]\n```"}}],
            "usage": {"prompt_tokens": 812, "completion_tokens": 41}
        }))
        .into_response(),
        Some("Bearer sk-limited") => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "7")],
            Json(json!({"error": {"message": "Rate limit reached"}})),
        )
            .into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Incorrect API key provided"}})),
        )
            .into_response(),
    }
}

async fn spawn_stub() -> (String, Stub) {
    let stub = Stub::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(chat))
        .with_state(stub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), stub)
}

fn request() -> VisionRequest {
    VisionRequest {
        system_prompt: "You are a menu analysis expert.".into(),
        instruction: "Extract menu items from this image.".into(),
        image: edgequake_llm::ImageData::new("/9j/4AAQ".to_string(), "image/jpeg"),
        max_tokens: 4096,
        temperature: 0.1,
    }
}

#[tokio::test]
async fn successful_call_returns_content_and_usage() {
    let (base, stub) = spawn_stub().await;
    let model = OpenAiVisionModel::new(ApiKey::new("sk-good").unwrap(), "gpt-4o", base, 10).unwrap();

    let reply = model.complete(&request()).await.unwrap();
    assert!(reply.content.contains("\"name\":\"Tea\""));
    assert_eq!(reply.input_tokens, 812);
    assert_eq!(reply.output_tokens, 41);

    let seen = stub.seen.lock().unwrap();
    let (auth, body) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-good"));
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["max_tokens"], 4096);
    assert_eq!(
        body["messages"][1]["content"][1]["image_url"]["url"],
        "data:image/jpeg;base64,/9j/4AAQ"
    );
}

#[tokio::test]
async fn rejected_key_is_an_auth_error() {
    let (base, _) = spawn_stub().await;
    let model = OpenAiVisionModel::new(ApiKey::new("sk-bad").unwrap(), "gpt-4o", base, 10).unwrap();

    match model.complete(&request()).await {
        Err(ModelError::Auth { detail, .. }) => assert_eq!(detail, "Incorrect API key provided"),
        other => panic!("expected auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let (base, _) = spawn_stub().await;
    let model =
        OpenAiVisionModel::new(ApiKey::new("sk-limited").unwrap(), "gpt-4o", base, 10).unwrap();

    let err = model.complete(&request()).await.unwrap_err();
    assert!(matches!(
        err,
        ModelError::RateLimited {
            retry_after_secs: Some(7),
            ..
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn session_key_drives_the_http_backend() {
    let (base, stub) = spawn_stub().await;
    let root = tempfile::tempdir().unwrap();
    let config = ExtractionConfig::builder()
        .api_base_url(base)
        .build()
        .unwrap();

    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([9, 9, 9])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();

    let mut session = Session::new(root.path());
    session.upload(Upload::new("menu.png", "image/png", buf).unwrap(), &config)
        .await
        .unwrap();

    session.set_api_key(ApiKey::new("sk-good"));
    let output = session.process(&config).await.unwrap();
    assert_eq!(output.stats.total_items, 1);
    assert_eq!(output.stats.total_input_tokens, 812);
    assert_eq!(session.document().unwrap().items()[0].name, "Tea");

    session.set_api_key(ApiKey::new("sk-bad"));
    let output = session.process(&config).await.unwrap();
    assert!(output.is_empty());
    assert!(matches!(
        output.warnings().next(),
        Some(ExtractionError::ApiFailed { image: 1, .. })
    ));

    let seen = stub.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1["messages"][0]["role"], "system");
}
