//! Web form and JSON API over the research engine.

use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use sage_core::{ResearchAnswer, ResearchEngine, SageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const API_VERSION: &str = "v1";

/// Shared state for all handlers.
///
/// Queries run one at a time: the engine is behind an async mutex.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<ResearchEngine>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: ResearchEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// API types
// ============================================================================

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub metadata: ApiMetadata,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, request_id: String, duration_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ApiMetadata::new(request_id, duration_ms),
        }
    }
}

/// Response metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiMetadata {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub duration_ms: u64,
}

impl ApiMetadata {
    fn new(request_id: String, duration_ms: u64) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
            version: API_VERSION.to_string(),
            duration_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub snippets: usize,
    pub vectors: usize,
    pub generator: String,
}

// ============================================================================
// Errors
// ============================================================================

/// API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request
    BadRequest(String),
    /// Internal server error
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
    pub metadata: ApiMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<SageError> for ApiError {
    fn from(err: SageError) -> Self {
        match err {
            SageError::EmptyQuestion => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
            metadata: ApiMetadata::new(uuid::Uuid::new_v4().to_string(), 0),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ask", post(ask_form))
        .route("/api/v1/ask", post(ask_api))
        .route("/api/v1/health", get(health))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Bind `host:port` and serve until the process is stopped.
pub async fn serve(engine: ResearchEngine, host: &str, port: u16) -> anyhow::Result<()> {
    use anyhow::Context;

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Failed to parse socket address")?;
    let app = router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Research form listening on http://{}", addr);
    info!("  GET  /                - Question form");
    info!("  POST /ask             - Form submission");
    info!("  POST /api/v1/ask      - JSON research query");
    info!("  GET  /api/v1/health   - Health check");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AskForm {
    #[serde(default)]
    pub question: String,
}

async fn index() -> Html<String> {
    Html(render_page(&Page::default()))
}

async fn ask_form(State(state): State<AppState>, Form(form): Form<AskForm>) -> Response {
    if form.question.trim().is_empty() {
        let page = Page {
            error: Some(SageError::EmptyQuestion.to_string()),
            ..Page::default()
        };
        return (StatusCode::BAD_REQUEST, Html(render_page(&page))).into_response();
    }

    let result = state.engine.lock().await.research(&form.question).await;
    match result {
        Ok(answer) => Html(render_page(&Page {
            question: form.question,
            result: Some(answer),
            error: None,
        }))
        .into_response(),
        Err(e) => {
            error!("Research failed: {}", e);
            let message = format!("Research failed: {}", e);
            let page = Page {
                question: form.question,
                result: None,
                error: Some(message),
            };
            let status = ApiError::from(e).status_code();
            (status, Html(render_page(&page))).into_response()
        }
    }
}

async fn ask_api(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> ApiResult<Json<ApiResponse<ResearchAnswer>>> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let start = Instant::now();

    if request.question.trim().is_empty() {
        return Err(SageError::EmptyQuestion.into());
    }

    let answer = state.engine.lock().await.research(&request.question).await?;

    Ok(Json(ApiResponse::success(
        answer,
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let start = Instant::now();

    let engine = state.engine.lock().await;
    let stats = engine.stats();

    let health = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        snippets: stats.snippets,
        vectors: stats.vectors,
        generator: engine.generator_name().to_string(),
    };

    Json(ApiResponse::success(
        health,
        request_id,
        start.elapsed().as_millis() as u64,
    ))
}

// ============================================================================
// HTML
// ============================================================================

#[derive(Default)]
struct Page {
    question: String,
    result: Option<ResearchAnswer>,
    error: Option<String>,
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn render_page(page: &Page) -> String {
    let mut body = String::new();

    body.push_str(&format!(
        r#"<form method="post" action="/ask">
  <label for="question">Enter your research question:</label>
  <input id="question" name="question" type="text" size="80" value="{}">
  <button type="submit">Research</button>
</form>
"#,
        escape_html(&page.question)
    ));

    if let Some(error) = &page.error {
        body.push_str(&format!(
            "<p class=\"error\" role=\"alert\">{}</p>\n",
            escape_html(error)
        ));
    }

    if let Some(result) = &page.result {
        body.push_str("<h2>Final Answer</h2>\n");
        body.push_str(&format!("<p class=\"answer\">{}</p>\n", escape_html(&result.answer)));

        if !result.context.is_empty() {
            body.push_str("<h3>Retrieved research</h3>\n<ol>\n");
            for snippet in &result.context {
                body.push_str(&format!(
                    "  <li><pre>{}</pre></li>\n",
                    escape_html(&snippet.content)
                ));
            }
            body.push_str("</ol>\n");
        }
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Sage Research Analyst</title>
<style>
body {{ font-family: sans-serif; max-width: 52rem; margin: 2rem auto; }}
.error {{ color: #b00020; }}
pre {{ white-space: pre-wrap; }}
</style>
</head>
<body>
<h1>Sage Research Analyst</h1>
{}</body>
</html>
"#,
        body
    )
}
