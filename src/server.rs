//! Browser UI: upload a menu, pick images, extract, edit, download.
//!
//! Sessions are identified by the `menu_vision_session` cookie. Each session
//! sits behind its own async mutex, so one user's long processing run never
//! blocks another user, and two tabs of the same user are serialised.
//! Sessions left idle are ended by a background sweep, which deletes their
//! workspaces.
//!
//! | Route | Action |
//! |-------|--------|
//! | `GET /` | render the page |
//! | `POST /api-key` | store or clear the API key (`api_key` form field) |
//! | `POST /upload` | multipart `file` field; PDF, JPEG or PNG |
//! | `GET /images/{n}` | persisted `image_<n>.jpg` |
//! | `POST /process` | `image_<n>` checkboxes select what is sent to the model |
//! | `POST /table` | `cell_<row>_<col>` fields overwrite table cells |
//! | `GET /download/json`, `GET /download/csv` | exports |
//! | `POST /session/end` | delete the workspace and forget the session |

use crate::config::{ExtractionConfig, ImageSelection};
use crate::error::MenuError;
use crate::export::{CSV_FILE_NAME, CSV_MIME, JSON_FILE_NAME, JSON_MIME};
use crate::model::ApiKey;
use crate::pipeline::input::Upload;
use crate::session::Session;
use axum::{
    extract::{Form, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "menu_vision_session";

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Sessions untouched for this long are ended by the sweeper.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How often [`serve`] looks for idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type SharedSession = Arc<tokio::sync::Mutex<Session>>;

struct SessionEntry {
    session: SharedSession,
    last_seen: Instant,
}

impl SessionEntry {
    fn touch(&mut self) -> SharedSession {
        self.last_seen = Instant::now();
        Arc::clone(&self.session)
    }
}

/// Shared server state: the session table and the base extraction config.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<Mutex<HashMap<Uuid, SessionEntry>>>,
    config: Arc<ExtractionConfig>,
    idle_timeout: Duration,
}

impl AppState {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The caller's session, created on first contact. The second value is a
    /// `Set-Cookie` header to send when the session is new.
    fn session(&self, headers: &HeaderMap) -> (SharedSession, Option<String>) {
        if let Some(existing) = self.existing(headers) {
            return (existing, None);
        }
        let session = Session::new(self.config.workspace_root());
        let id = session.id();
        let shared = Arc::new(tokio::sync::Mutex::new(session));
        self.lock().insert(
            id,
            SessionEntry {
                session: Arc::clone(&shared),
                last_seen: Instant::now(),
            },
        );
        info!("New session {}", id);
        (
            shared,
            Some(format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax")),
        )
    }

    /// The caller's session if the cookie names a live one. Never creates.
    fn existing(&self, headers: &HeaderMap) -> Option<SharedSession> {
        let id = session_id(headers)?;
        let shared = self.lock().get_mut(&id).map(SessionEntry::touch);
        shared
    }

    fn remove(&self, headers: &HeaderMap) -> Option<SharedSession> {
        let id = session_id(headers)?;
        let entry = self.lock().remove(&id);
        entry.map(|entry| entry.session)
    }

    /// End every session idle for longer than the timeout. Sessions busy
    /// with a request are skipped. Returns how many were ended.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.lock().retain(|id, entry| {
            let idle = now.duration_since(entry.last_seen) >= self.idle_timeout;
            if idle && entry.session.try_lock().is_ok() {
                expired.push((*id, Arc::clone(&entry.session)));
                false
            } else {
                true
            }
        });

        for (id, shared) in &expired {
            let mut session = shared.lock().await;
            if let Err(e) = session.end() {
                warn!("Session {}: cleanup failed: {}", id, e);
            }
            info!("Expired idle session {}", id);
        }
        expired.len()
    }

    /// Run [`AppState::sweep_idle`] every `interval` until the runtime stops.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            loop {
                ticks.tick().await;
                state.sweep_idle().await;
            }
        })
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api-key", post(set_api_key))
        .route("/upload", post(upload))
        .route("/images/{index}", get(image))
        .route("/process", post(process))
        .route("/table", post(edit_table))
        .route("/download/json", get(download_json))
        .route("/download/csv", get(download_csv))
        .route("/session/end", post(end_session))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the UI on `addr` until the process is stopped. Sessions idle for
/// longer than `idle_timeout` are ended in the background.
pub async fn serve(
    addr: SocketAddr,
    config: ExtractionConfig,
    idle_timeout: Duration,
) -> Result<(), MenuError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| MenuError::Internal(format!("cannot bind {addr}: {e}")))?;
    let state = AppState::new(config).with_idle_timeout(idle_timeout);
    let sweeper = state.spawn_sweeper(SWEEP_INTERVAL.min(idle_timeout).max(Duration::from_secs(1)));
    info!("Menu processor listening on http://{}", addr);
    let result = axum::serve(listener, router(state))
        .await
        .map_err(|e| MenuError::Internal(format!("server error: {e}")));
    sweeper.abort();
    result
}

fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (shared, cookie) = state.session(&headers);
    let session = shared.lock().await;
    page(StatusCode::OK, cookie, &session, &[])
}

#[derive(Deserialize)]
struct ApiKeyForm {
    #[serde(default)]
    api_key: String,
}

async fn set_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ApiKeyForm>,
) -> Response {
    let (shared, cookie) = state.session(&headers);
    let mut session = shared.lock().await;
    session.set_api_key(ApiKey::new(form.api_key));
    let notice = if session.has_api_key() {
        Notice::success("API key saved for this session.")
    } else {
        Notice::warning("API key cleared.")
    };
    page(StatusCode::OK, cookie, &session, &[notice])
}

async fn upload(State(state): State<AppState>, headers: HeaderMap, multipart: Multipart) -> Response {
    let (shared, cookie) = state.session(&headers);
    let mut session = shared.lock().await;

    let result = async {
        let upload = read_upload(multipart).await?;
        let count = session.upload(upload, &state.config).await?.len();
        Ok::<_, MenuError>(count)
    }
    .await;

    match result {
        Ok(count) => {
            let notice = Notice::success(format!(
                "Images extracted successfully! Extracted {count} image(s)."
            ));
            page(StatusCode::OK, cookie, &session, &[notice])
        }
        Err(e) => error_page(cookie, &session, e),
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, MenuError> {
    let bad = |e: axum::extract::multipart::MultipartError| MenuError::InvalidInput {
        input: format!("malformed upload: {e}"),
    };
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let mime = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        // Reject before buffering anything the rasteriser cannot handle.
        crate::pipeline::input::MediaType::from_mime(&mime)?;
        let bytes = field.bytes().await.map_err(bad)?;
        if bytes.is_empty() {
            return Err(MenuError::NoUpload);
        }
        return Upload::new(file_name, &mime, bytes.to_vec());
    }
    Err(MenuError::NoUpload)
}

async fn image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(index): Path<usize>,
) -> Response {
    let Some(shared) = state.existing(&headers) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let path = {
        let session = shared.lock().await;
        match session.image(index) {
            Some(img) => img.path.clone(),
            None => return StatusCode::NOT_FOUND.into_response(),
        }
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let (shared, cookie) = state.session(&headers);
    let mut session = shared.lock().await;

    let selected = selected_images(&form);
    if selected.is_empty() {
        let total = session.images().len();
        let err = if total == 0 {
            MenuError::NoUpload
        } else {
            MenuError::NothingSelected { total }
        };
        return error_page(cookie, &session, err);
    }

    let mut config = (*state.config).clone();
    config.images = ImageSelection::Set(selected);

    match session.process(&config).await {
        Ok(output) => {
            let mut notices = Vec::new();
            if output.is_empty() {
                notices.push(Notice::warning("No menu items were found in the selected images."));
            } else {
                notices.push(Notice::success(format!(
                    "Extracted {} menu items from {} image(s).",
                    output.stats.total_items, output.stats.processed_images
                )));
            }
            page(StatusCode::OK, cookie, &session, &notices)
        }
        Err(e) => error_page(cookie, &session, e),
    }
}

/// 1-based indices from `image_<n>` form keys, ascending.
fn selected_images(form: &HashMap<String, String>) -> Vec<usize> {
    let mut selected: Vec<usize> = form
        .keys()
        .filter_map(|k| k.strip_prefix("image_"))
        .filter_map(|n| n.parse().ok())
        .collect();
    selected.sort_unstable();
    selected.dedup();
    selected
}

async fn edit_table(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let (shared, cookie) = state.session(&headers);
    let mut session = shared.lock().await;

    let result = match session.document_mut() {
        None => Err(MenuError::NoResults),
        Some(doc) => doc.table_mut().set_cells_at(
            form.iter()
                .filter_map(|(key, value)| parse_cell_key(key).map(|(r, c)| (r, c, value.as_str()))),
        ),
    };

    match result {
        Ok(()) => page(StatusCode::OK, cookie, &session, &[Notice::success("Edits saved.")]),
        Err(e) => error_page(cookie, &session, e),
    }
}

/// `cell_<row>_<col>` → 0-based `(row, col)`.
fn parse_cell_key(key: &str) -> Option<(usize, usize)> {
    let (row, col) = key.strip_prefix("cell_")?.split_once('_')?;
    Some((row.parse().ok()?, col.parse().ok()?))
}

async fn download_json(State(state): State<AppState>, headers: HeaderMap) -> Response {
    download(state, headers, JSON_FILE_NAME, JSON_MIME, |doc| doc.to_json()).await
}

async fn download_csv(State(state): State<AppState>, headers: HeaderMap) -> Response {
    download(state, headers, CSV_FILE_NAME, CSV_MIME, |doc| doc.to_csv()).await
}

async fn download(
    state: AppState,
    headers: HeaderMap,
    file_name: &str,
    mime: &'static str,
    render: impl FnOnce(&crate::export::MenuDocument) -> Result<String, MenuError>,
) -> Response {
    let Some(shared) = state.existing(&headers) else {
        let err = MenuError::NoResults;
        return (status_for(&err), err.to_string()).into_response();
    };
    let session = shared.lock().await;
    let Some(doc) = session.document() else {
        return error_page(None, &session, MenuError::NoResults);
    };
    match render(doc) {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, mime.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{file_name}\""),
                ),
            ],
            body,
        )
            .into_response(),
        Err(e) => error_page(None, &session, e),
    }
}

async fn end_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(shared) = state.remove(&headers) {
        let mut session = shared.lock().await;
        if let Err(e) = session.end() {
            warn!("Session {}: cleanup failed: {}", session.id(), e);
        }
        info!("Ended session {}", session.id());
    }
    let mut response = Html(render_ended()).into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        HeaderValue::from_static("menu_vision_session=; Path=/; Max-Age=0"),
    );
    response
}

// ── Rendering ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoticeKind {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
struct Notice {
    kind: NoticeKind,
    text: String,
}

impl Notice {
    fn success(text: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Success, text: text.into() }
    }
    fn warning(text: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Warning, text: text.into() }
    }
    fn error(text: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Error, text: text.into() }
    }
}

fn status_for(err: &MenuError) -> StatusCode {
    match err {
        MenuError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        MenuError::MissingCredential => StatusCode::UNAUTHORIZED,
        MenuError::CorruptDocument { .. }
        | MenuError::PasswordRequired { .. }
        | MenuError::WrongPassword { .. }
        | MenuError::EmptyDocument { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        MenuError::InvalidInput { .. }
        | MenuError::NoUpload
        | MenuError::NothingSelected { .. }
        | MenuError::NoResults
        | MenuError::CellOutOfRange { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_page(cookie: Option<String>, session: &Session, err: MenuError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!("Session {}: {}", session.id(), err);
    }
    let text = match err {
        MenuError::MissingCredential => {
            "Please enter your OpenAI API key to continue.".to_string()
        }
        other => other.to_string(),
    };
    page(status, cookie, session, &[Notice::error(text)])
}

fn page(status: StatusCode, cookie: Option<String>, session: &Session, notices: &[Notice]) -> Response {
    let mut response = (status, Html(render_page(session, notices))).into_response();
    if let Some(value) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

/// Minimal HTML escaping for text and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = "body{font-family:sans-serif;max-width:1100px;margin:2rem auto;padding:0 1rem}\
.notice{padding:.6rem 1rem;border-radius:4px;margin:.5rem 0}\
.success{background:#e6f4ea}.warning{background:#fff4e5}.error{background:#fdecea}\
.images{display:flex;flex-wrap:wrap;gap:1rem}.images figure{width:30%;margin:0}\
.images img{width:100%}table{border-collapse:collapse}td input{width:100%}\
th,td{border:1px solid #ccc;padding:2px}";

fn render_page(session: &Session, notices: &[Notice]) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>Menu Processor</title>\
         <style>{STYLE}</style></head><body><h1>Menu Processor with OpenAI Vision</h1>"
    );

    for notice in notices {
        let class = match notice.kind {
            NoticeKind::Success => "success",
            NoticeKind::Warning => "warning",
            NoticeKind::Error => "error",
        };
        let _ = write!(
            html,
            "<div class=\"notice {class}\">{}</div>",
            escape_html(&notice.text)
        );
    }

    // API key
    html.push_str("<section><h2>API key</h2>");
    if session.has_api_key() {
        html.push_str("<p>An API key is set for this session.</p>");
    } else {
        html.push_str(
            "<div class=\"notice warning\">Please enter your OpenAI API key to continue.</div>",
        );
    }
    html.push_str(
        "<form method=\"post\" action=\"/api-key\">\
         <input type=\"password\" name=\"api_key\" placeholder=\"Enter your OpenAI API Key\" autocomplete=\"off\">\
         <button type=\"submit\">Save</button></form></section>",
    );

    // Upload
    html.push_str(
        "<section><h2>Upload</h2>\
         <form method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\">\
         <input type=\"file\" name=\"file\" accept=\".pdf,.jpg,.jpeg,.png,application/pdf,image/jpeg,image/png\">\
         <button type=\"submit\">Upload a PDF or JPEG/PNG image</button></form>",
    );
    if let Some(name) = session.last_upload() {
        let _ = write!(html, "<p>Current file: {}</p>", escape_html(name));
    }
    html.push_str("</section>");

    // Images
    if !session.images().is_empty() {
        let _ = write!(
            html,
            "<section><h2>Select images to process</h2><p>Extracted {} image(s).</p>\
             <form method=\"post\" action=\"/process\"><div class=\"images\">",
            session.images().len()
        );
        for img in session.images() {
            let _ = write!(
                html,
                "<figure><label><input type=\"checkbox\" name=\"image_{n}\"> image_{n}.jpg</label>\
                 <img src=\"/images/{n}\" alt=\"{caption}\"><figcaption>{caption}</figcaption></figure>",
                n = img.index,
                caption = escape_html(&img.caption())
            );
        }
        html.push_str("</div><button type=\"submit\">Start Processing</button></form></section>");
    }

    for warning in session.warnings() {
        let _ = write!(
            html,
            "<div class=\"notice warning\">{}</div>",
            escape_html(&warning.to_string())
        );
    }

    // Results
    if let Some(doc) = session.document() {
        let raw = doc.to_json().unwrap_or_default();
        let _ = write!(
            html,
            "<section><details><summary>View Raw JSON</summary><pre>{}</pre></details>",
            escape_html(&raw)
        );

        html.push_str(
            "<h2>Edit Menu Data</h2><form method=\"post\" action=\"/table\"><table><thead><tr>",
        );
        for column in doc.table().columns() {
            let _ = write!(html, "<th>{}</th>", escape_html(column));
        }
        html.push_str("</tr></thead><tbody>");
        for (r, row) in doc.table().rows().iter().enumerate() {
            html.push_str("<tr>");
            for (c, value) in row.iter().enumerate() {
                let _ = write!(
                    html,
                    "<td><input name=\"cell_{r}_{c}\" value=\"{}\"></td>",
                    escape_html(value)
                );
            }
            html.push_str("</tr>");
        }
        html.push_str(
            "</tbody></table><button type=\"submit\">Save edits</button></form>\
             <h2>Download Options</h2>\
             <p><a href=\"/download/json\">Download JSON</a> · \
             <a href=\"/download/csv\">Download CSV</a></p></section>",
        );
    }

    html.push_str(
        "<form method=\"post\" action=\"/session/end\"><button type=\"submit\">End session</button></form>\
         </body></html>",
    );
    html
}

fn render_ended() -> String {
    "<!doctype html><html><head><meta charset=\"utf-8\"><title>Menu Processor</title></head>\
     <body><p>Session ended. Uploaded files have been deleted.</p><p><a href=\"/\">Start over</a></p></body></html>"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html("<b>\"Fish & Chips\"</b>"),
            "&lt;b&gt;&quot;Fish &amp; Chips&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn reads_session_cookie() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {SESSION_COOKIE}={id}")).unwrap(),
        );
        assert_eq!(session_id(&headers), Some(id));
        assert_eq!(session_id(&HeaderMap::new()), None);
    }

    #[test]
    fn form_keys() {
        let form: HashMap<String, String> = [
            ("image_3".to_string(), "on".to_string()),
            ("image_1".to_string(), "on".to_string()),
            ("other".to_string(), "x".to_string()),
        ]
        .into();
        assert_eq!(selected_images(&form), [1, 3]);
        assert_eq!(parse_cell_key("cell_2_4"), Some((2, 4)));
        assert_eq!(parse_cell_key("cell_x_4"), None);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            status_for(&MenuError::UnsupportedFormat { mime: "text/plain".into() }),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(status_for(&MenuError::MissingCredential), StatusCode::UNAUTHORIZED);
    }
}
