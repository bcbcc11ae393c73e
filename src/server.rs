//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Multipart PDF upload (field `file`); extract, chunk and index it |
//! | `POST` | `/chat` | `{query}` → `{response, sources}`, with per-session history |
//! | `POST` | `/chat/reset` | Forget the caller's chat history |
//! | `POST` | `/generate_flashcards` | `{flashcards: [{front, back}]}` from indexed notes |
//! | `POST` | `/generate_quiz` | `{quiz: [{question, options, correct_answer}]}` |
//! | `GET`  | `/health` | Status, version and indexed chunk count |
//! | `GET`  | `/` | Plain-text greeting |
//!
//! # Error Contract
//!
//! Chat errors keep the chat response shape so a client can render them in
//! the conversation; every other endpoint reports `error`:
//!
//! ```json
//! { "response": "Unsafe input detected. Request refused.", "code": "validation_rejected" }
//! { "error": "No notes have been uploaded yet.", "code": "empty_index" }
//! ```
//!
//! | Code | Status | Cause |
//! |------|--------|-------|
//! | `bad_request` | 400 | Missing / non-PDF / empty upload |
//! | `payload_too_large` | 413 | Upload larger than `[upload].max_bytes` |
//! | `validation_rejected` | 400 | Query too long or unsafe |
//! | `empty_index` | 400 | Generation requested before any upload |
//! | `ingest_failed` | 500 | Extraction, empty document or indexing failure |
//! | `retrieval_failed` | 500 | Query embedding failed |
//! | `model_error` | 502 | The model answered with an error |
//! | `model_unreachable` | 503 | The model could not be reached |
//!
//! # Sessions
//!
//! The first `/chat` call sets a `study_session` cookie holding a UUID; the
//! history for that id is kept server side. CORS allows credentials for the
//! configured origins so browsers send the cookie back.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::extract::TextExtractor;
use crate::generation::{flashcards_or_placeholder, quiz_or_empty};
use crate::index::InMemoryIndex;
use crate::llm::{ChatModel, LlmError, OllamaClient};
use crate::models::{ChatTurn, Flashcard, QuizItem};
use crate::orchestrator::Orchestrator;
use crate::retriever::{IngestReport, Retriever};
use crate::session::SessionStore;
use crate::telemetry::{Pathway, TelemetryRecord, TelemetrySink};
use crate::validate::Validator;

/// The pluggable backends behind the API.
pub struct Components {
    pub extractor: TextExtractor,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub model: Arc<dyn ChatModel>,
}

impl Components {
    /// pdf-extract + tesseract, the configured embedder, and Ollama.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            extractor: TextExtractor::from_config(&config.extraction),
            embedder: create_provider(&config.embedding)?,
            model: Arc::new(OllamaClient::new(&config.llm)?),
        })
    }
}

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    retriever: Arc<Retriever>,
    orchestrator: Arc<Orchestrator>,
    validator: Arc<Validator>,
    sessions: Arc<SessionStore>,
    telemetry: Arc<TelemetrySink>,
}

impl AppState {
    pub fn new(config: Config, components: Components) -> anyhow::Result<Self> {
        info!(
            embedder = components.embedder.model_name(),
            dims = components.embedder.dims(),
            model = components.model.model_name(),
            "initializing study pipeline"
        );
        let index = Arc::new(InMemoryIndex::new(components.embedder));
        let retriever = Retriever::new(components.extractor, index, config.chunking.clone());
        let validator = Validator::new(&config.validation)?;

        Ok(Self {
            retriever: Arc::new(retriever),
            orchestrator: Arc::new(Orchestrator::new(components.model)),
            validator: Arc::new(validator),
            sessions: Arc::new(SessionStore::new(&config.session)),
            telemetry: Arc::new(TelemetrySink::new(&config.telemetry)),
            config: Arc::new(config),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(config.clone(), Components::from_config(config)?)
    }

    async fn record(&self, record: TelemetryRecord) {
        self.telemetry.log(&record).await;
    }
}

/// Build the router with CORS, request tracing and the upload size limit.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    let max_upload = state.config.upload.max_bytes;

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/chat", post(handle_chat))
        .route("/chat/reset", post(handle_reset))
        .route("/generate_flashcards", post(handle_flashcards))
        .route("/generate_quiz", post(handle_quiz))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "study server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Debug, Clone, Copy)]
enum ErrorShape {
    /// `{ "response", "code" }`
    Chat,
    /// `{ "error", "code" }`
    Plain,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    shape: ErrorShape,
}

impl ApiError {
    fn plain(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            shape: ErrorShape::Plain,
        }
    }

    fn chat(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            shape: ErrorShape::Chat,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::plain(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn empty_index() -> Self {
        Self::plain(
            StatusCode::BAD_REQUEST,
            "empty_index",
            "No notes have been uploaded yet. Upload a PDF first.",
        )
    }

    fn with_shape(mut self, shape: ErrorShape) -> Self {
        self.shape = shape;
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.shape {
            ErrorShape::Chat => serde_json::json!({ "response": self.message, "code": self.code }),
            ErrorShape::Plain => serde_json::json!({ "error": self.message, "code": self.code }),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Model failures map to a status, an error code and a telemetry pathway.
fn model_failure(err: &LlmError) -> (ApiError, Pathway) {
    match err {
        LlmError::Unreachable { .. } => (
            ApiError::plain(StatusCode::SERVICE_UNAVAILABLE, "model_unreachable", err.to_string()),
            Pathway::ModelUnreachable,
        ),
        LlmError::Backend { .. } | LlmError::InvalidResponse(_) => (
            ApiError::plain(StatusCode::BAD_GATEWAY, "model_error", err.to_string()),
            Pathway::ModelError,
        ),
    }
}

// ============ Sessions ============

/// The caller's session id, minting a cookie when there is none (or it is
/// not a UUID).
fn session_id(jar: CookieJar, cookie_name: &str) -> (CookieJar, Uuid) {
    if let Some(id) = jar
        .get(cookie_name)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
    {
        return (jar, id);
    }
    let id = Uuid::new_v4();
    let cookie = Cookie::build((cookie_name.to_string(), id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    (jar.add(cookie), id)
}

// ============ GET / and /health ============

async fn handle_root() -> &'static str {
    "Hello, World!"
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    indexed_chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        indexed_chunks: state.retriever.index().count().await,
    })
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    filename: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let started = Instant::now();
    let mut received = 0;
    let result = receive_and_ingest(&state, multipart, &mut received).await;
    let latency = started.elapsed();

    match result {
        Ok(report) => {
            state
                .record(
                    TelemetryRecord::new("upload", Pathway::Ingest, latency)
                        .lengths(received, report.chunks),
                )
                .await;
            Ok(Json(UploadResponse {
                message: report.message,
                filename: report.filename,
            }))
        }
        Err((error, pathway)) => {
            state
                .record(
                    TelemetryRecord::new("upload", pathway, latency)
                        .lengths(received, 0)
                        .failed(),
                )
                .await;
            Err(error)
        }
    }
}

/// Read the `file` field, stage it on disk and ingest it. `received` is set
/// to the upload size once the field has been read.
async fn receive_and_ingest(
    state: &AppState,
    mut multipart: Multipart,
    received: &mut usize,
) -> Result<IngestReport, (ApiError, Pathway)> {
    let rejected = |e: ApiError| (e, Pathway::UploadRejected);

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| rejected(multipart_error("Invalid multipart body", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| rejected(multipart_error("Failed to read upload", e)))?;
        upload = Some((filename, data));
        break;
    }

    let (raw_name, data) =
        upload.ok_or_else(|| rejected(ApiError::bad_request("No file part")))?;
    *received = data.len();
    // Browsers may send a full client path; keep only the last component.
    let filename = Path::new(&raw_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    if filename.is_empty() {
        return Err(rejected(ApiError::bad_request("No selected file")));
    }
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(rejected(ApiError::bad_request("Only PDF files are supported")));
    }
    if data.is_empty() {
        return Err(rejected(ApiError::bad_request("Uploaded file is empty")));
    }

    let internal = |e: std::io::Error| {
        warn!(error = %e, "could not stage upload");
        (
            ApiError::plain(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()),
            Pathway::IngestFailed,
        )
    };
    let staged = match &state.config.upload.temp_dir {
        Some(dir) => tempfile::Builder::new().suffix(".pdf").tempfile_in(dir),
        None => tempfile::Builder::new().suffix(".pdf").tempfile(),
    }
    .map_err(internal)?;
    tokio::fs::write(staged.path(), &data)
        .await
        .map_err(internal)?;

    state
        .retriever
        .ingest(staged.path(), &filename)
        .await
        .map_err(|e| {
            warn!(filename = %filename, error = %e, "ingest failed");
            (
                ApiError::plain(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ingest_failed",
                    e.to_string(),
                ),
                Pathway::IngestFailed,
            )
        })
}

/// Body-limit rejections keep their 413; anything else is a malformed body.
fn multipart_error(context: &str, err: MultipartError) -> ApiError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::plain(status, "payload_too_large", "Upload exceeds the maximum allowed size")
    } else {
        ApiError::bad_request(format!("{}: {}", context, err.body_text()))
    }
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    query: String,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    sources: Vec<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<ChatRequest>,
) -> Result<(CookieJar, Json<ChatResponse>), ApiError> {
    let started = Instant::now();
    let query = req.query;
    let input_length = query.chars().count();

    if let Err(rejection) = state.validator.validate_query(&query) {
        info!(reason = ?rejection, "chat query rejected");
        state
            .record(
                TelemetryRecord::new("chat", Pathway::ValidationRejected, started.elapsed())
                    .lengths(input_length, 0)
                    .failed(),
            )
            .await;
        return Err(ApiError::chat(
            StatusCode::BAD_REQUEST,
            "validation_rejected",
            rejection.to_string(),
        ));
    }

    let (jar, session) = session_id(jar, &state.config.session.cookie_name);
    let history = state.sessions.history(session).await;

    let retrieved = match state
        .retriever
        .retrieve_context(&query, state.config.retrieval.top_k)
        .await
    {
        Ok(retrieved) => retrieved,
        Err(e) => {
            warn!(error = %e, "retrieval failed");
            state
                .record(
                    TelemetryRecord::new("chat", Pathway::RetrievalFailed, started.elapsed())
                        .lengths(input_length, 0)
                        .failed(),
                )
                .await;
            return Err(ApiError::chat(
                StatusCode::INTERNAL_SERVER_ERROR,
                "retrieval_failed",
                format!("Could not search your notes: {}", e),
            ));
        }
    };

    let answer = match state
        .orchestrator
        .chat(&retrieved.context, &query, &history)
        .await
    {
        Ok(answer) => answer,
        Err(e) => {
            let (error, pathway) = model_failure(&e);
            warn!(error = %e, "chat model call failed");
            state
                .record(
                    TelemetryRecord::new("chat", pathway, started.elapsed())
                        .lengths(input_length, 0)
                        .failed(),
                )
                .await;
            return Err(error.with_shape(ErrorShape::Chat));
        }
    };

    let pathway = if retrieved.is_empty() {
        Pathway::NoContext
    } else {
        Pathway::Rag
    };
    state
        .record(
            TelemetryRecord::new("chat", pathway, started.elapsed())
                .lengths(input_length, answer.chars().count()),
        )
        .await;
    state
        .sessions
        .record(
            session,
            ChatTurn::user(query),
            ChatTurn::assistant(answer.clone(), retrieved.sources.clone()),
        )
        .await;

    Ok((
        jar,
        Json(ChatResponse {
            response: answer,
            sources: retrieved.sources,
        }),
    ))
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_reset(State(state): State<AppState>, jar: CookieJar) -> Json<MessageResponse> {
    if let Some(id) = jar
        .get(&state.config.session.cookie_name)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
    {
        state.sessions.reset(id).await;
    }
    Json(MessageResponse {
        message: "Chat history cleared".to_string(),
    })
}

// ============ POST /generate_flashcards, /generate_quiz ============

#[derive(Serialize)]
struct FlashcardsResponse {
    flashcards: Vec<Flashcard>,
}

#[derive(Serialize)]
struct QuizResponse {
    quiz: Vec<QuizItem>,
}

/// Sampled notes for generation, or the empty-index error.
async fn generation_context(
    state: &AppState,
    endpoint: &str,
    started: Instant,
) -> Result<String, ApiError> {
    if state.retriever.index().count().await == 0 {
        state
            .record(
                TelemetryRecord::new(endpoint, Pathway::EmptyIndex, started.elapsed()).failed(),
            )
            .await;
        return Err(ApiError::empty_index());
    }
    Ok(state
        .retriever
        .sample_context(state.config.retrieval.sample_size)
        .await)
}

async fn generation_failed(
    state: &AppState,
    endpoint: &str,
    started: Instant,
    input_length: usize,
    err: LlmError,
) -> ApiError {
    let (error, pathway) = model_failure(&err);
    warn!(endpoint, error = %err, "generation model call failed");
    state
        .record(
            TelemetryRecord::new(endpoint, pathway, started.elapsed())
                .lengths(input_length, 0)
                .failed(),
        )
        .await;
    error
}

async fn handle_flashcards(
    State(state): State<AppState>,
) -> Result<Json<FlashcardsResponse>, ApiError> {
    let started = Instant::now();
    let context = generation_context(&state, "generate_flashcards", started).await?;
    let input_length = context.chars().count();

    let parsed = match state.orchestrator.generate_flashcards(&context).await {
        Ok(parsed) => parsed,
        Err(e) => {
            return Err(
                generation_failed(&state, "generate_flashcards", started, input_length, e).await,
            )
        }
    };

    let malformed = parsed.is_unparseable();
    let flashcards = flashcards_or_placeholder(parsed);
    let mut record = TelemetryRecord::new(
        "generate_flashcards",
        if malformed { Pathway::MalformedOutput } else { Pathway::Flashcards },
        started.elapsed(),
    )
    .lengths(input_length, flashcards.len());
    if malformed {
        record = record.failed();
    }
    state.record(record).await;

    Ok(Json(FlashcardsResponse { flashcards }))
}

async fn handle_quiz(State(state): State<AppState>) -> Result<Json<QuizResponse>, ApiError> {
    let started = Instant::now();
    let context = generation_context(&state, "generate_quiz", started).await?;
    let input_length = context.chars().count();

    let parsed = match state.orchestrator.generate_quiz(&context).await {
        Ok(parsed) => parsed,
        Err(e) => {
            return Err(generation_failed(&state, "generate_quiz", started, input_length, e).await)
        }
    };

    let malformed = parsed.is_unparseable();
    let quiz = quiz_or_empty(parsed);
    let mut record = TelemetryRecord::new(
        "generate_quiz",
        if malformed { Pathway::MalformedOutput } else { Pathway::Quiz },
        started.elapsed(),
    )
    .lengths(input_length, quiz.len());
    if malformed {
        record = record.failed();
    }
    state.record(record).await;

    Ok(Json(QuizResponse { quiz }))
}
