//! HTTP API server.
//!
//! Exposes ingestion, question answering and store management as a JSON
//! REST API.
//!
//! # Endpoints
//!
//! | Method   | Path             | Description |
//! |----------|------------------|-------------|
//! | `POST`   | `/upload-pdf`    | Multipart upload (`file` field), ingest the PDF |
//! | `POST`   | `/chat`          | `{question, k?}` → answer with cited sources |
//! | `GET`    | `/status`        | Vector store status |
//! | `DELETE` | `/clear`         | Delete every stored entry |
//! | `GET`    | `/health`        | Liveness check (returns version) |
//! | `GET`    | `/provider-info` | Active LLM/embedding provider |
//!
//! # Error Contract
//!
//! Every error response has the same shape:
//!
//! ```json
//! { "success": false, "error": "empty_store", "message": "No documents have been uploaded yet. ..." }
//! ```
//!
//! Status codes: `invalid_upload`, `unreadable_pdf`, `empty_store`,
//! `bad_request` (400); `embedding_mismatch` (409); `internal` (500);
//! `provider_error` (502, including provider timeouts).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser client can
//! be served from anywhere.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chat::ChatEngine;
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::RagError;
use crate::extract;
use crate::ingest::DocumentProcessor;
use crate::llm::{self, ChatModel, ProviderInfo};
use crate::models::{SourceRef, StoreStatus};
use crate::store::{SqliteVectorStore, VectorStore};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    processor: Arc<DocumentProcessor>,
    chat: Arc<ChatEngine>,
    store: Arc<dyn VectorStore>,
    provider_info: Arc<ProviderInfo>,
    upload_dir: PathBuf,
}

impl AppState {
    /// Wire the pipeline from already-constructed components.
    pub fn new(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn ChatModel>,
    ) -> Self {
        let processor = DocumentProcessor::from_config(config, store.clone(), embedder.clone());
        let chat = ChatEngine::from_config(config, store.clone(), embedder, llm);
        Self {
            processor: Arc::new(processor),
            chat: Arc::new(chat),
            store,
            provider_info: Arc::new(llm::provider_info(config)),
            upload_dir: config.server.upload_dir.clone(),
        }
    }
}

/// Build the router with CORS, request tracing and the upload size limit.
pub fn create_router(state: AppState, max_upload_mb: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload-pdf", post(handle_upload))
        .route("/chat", post(handle_chat))
        .route("/status", get(handle_status))
        .route("/clear", delete(handle_clear))
        .route("/health", get(handle_health))
        .route("/provider-info", get(handle_provider_info))
        .layer(DefaultBodyLimit::max(max_upload_mb * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind` and run until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteVectorStore::open(&config.store.persist_directory).await?);
    let embedder = embedding::create_provider(config)?;
    let llm = llm::create_chat_model(config)?;

    std::fs::create_dir_all(&config.server.upload_dir).with_context(|| {
        format!(
            "Failed to create upload directory: {}",
            config.server.upload_dir.display()
        )
    })?;

    let state = AppState::new(config, store.clone(), embedder, llm);
    let app = create_router(state, config.server.max_upload_mb);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "PDF RAG server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    store.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
}

/// Handler error; wraps [`RagError`] and renders the JSON error body.
struct AppError(RagError);

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        AppError(err)
    }
}

fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::InvalidUpload(_)
        | RagError::UnreadablePdf(_)
        | RagError::EmptyStore
        | RagError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        RagError::EmbeddingMismatch { .. } => StatusCode::CONFLICT,
        RagError::Provider(_) => StatusCode::BAD_GATEWAY,
        RagError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::warn!(error = %self.0, "Request rejected");
        }

        let body = ErrorBody {
            success: false,
            error: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============ POST /upload-pdf ============

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    message: String,
    filename: String,
    chunks_created: usize,
    chunks_replaced: u64,
    total_documents: u64,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        RagError::InvalidUpload(format!("Malformed upload: {}", e))
    };

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(base_name).unwrap_or_default();
        let bytes = field.bytes().await.map_err(malformed)?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| RagError::InvalidUpload("No file uploaded".to_string()))?;
    extract::validate_upload(&filename, &bytes)?;

    // Removed when dropped, whatever the outcome.
    let upload_dir = state.upload_dir.clone();
    let staged = tokio::task::spawn_blocking(move || stage_upload(&upload_dir, &bytes))
        .await
        .map_err(|e| RagError::Storage(anyhow::anyhow!("Error saving file: {}", e)))??;
    let outcome = state.processor.process_pdf(staged.path(), &filename).await?;

    Ok(Json(UploadResponse {
        success: true,
        message: format!("Successfully processed {}", outcome.filename),
        filename: outcome.filename,
        chunks_created: outcome.chunks_created,
        chunks_replaced: outcome.chunks_replaced,
        total_documents: outcome.total_documents,
    }))
}

/// Strip any client-supplied directory components.
fn base_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

fn stage_upload(dir: &Path, bytes: &[u8]) -> Result<tempfile::NamedTempFile, RagError> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create upload directory: {}", dir.display()))?;
    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".pdf")
        .tempfile_in(dir)
        .context("Error saving file")?;
    file.write_all(bytes).context("Error saving file")?;
    Ok(file)
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct ChatResponse {
    success: bool,
    answer: String,
    num_sources: usize,
    sources: Vec<SourceRef>,
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload.map_err(|e| RagError::InvalidRequest(e.body_text()))?;
    let answer = state.chat.chat(&request.question, request.k).await?;

    Ok(Json(ChatResponse {
        success: true,
        answer: answer.answer,
        num_sources: answer.sources.len(),
        sources: answer.sources,
    }))
}

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: StoreStatus,
    message: String,
}

async fn handle_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let status = state.store.status().await?;
    Ok(Json(StatusResponse {
        message: status.message(),
        status,
    }))
}

// ============ DELETE /clear ============

#[derive(Serialize)]
struct ClearResponse {
    success: bool,
    message: String,
    removed: u64,
}

async fn handle_clear(State(state): State<AppState>) -> Result<Json<ClearResponse>, AppError> {
    let removed = state.store.clear().await?;
    Ok(Json(ClearResponse {
        success: true,
        message: "Vector store cleared successfully".to_string(),
        removed,
    }))
}

// ============ GET /health, GET /provider-info ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "PDF RAG System is running",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_provider_info(State(state): State<AppState>) -> Json<ProviderInfo> {
    Json((*state.provider_info).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingKind, LlmProvider};
    use crate::embedding::HashEmbeddings;
    use crate::extract::fixtures;
    use crate::provider::ProviderError;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct EchoModel;

    #[async_trait]
    impl ChatModel for EchoModel {
        fn provider_name(&self) -> &str {
            "ollama"
        }

        fn model_name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, _system: &str, _prompt: &str) -> Result<String, ProviderError> {
            Ok("echoed".to_string())
        }
    }

    const BOUNDARY: &str = "pdfragtestboundary";

    async fn test_app() -> (TempDir, Arc<SqliteVectorStore>, AppState, Router) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store.persist_directory = tmp.path().join("vs");
        config.server.upload_dir = tmp.path().join("uploads");
        config.llm.provider = LlmProvider::Ollama;
        config.embedding.provider = Some(EmbeddingKind::Hash);

        let store = Arc::new(
            SqliteVectorStore::open(&config.store.persist_directory)
                .await
                .unwrap(),
        );
        let state = AppState::new(
            &config,
            store.clone(),
            Arc::new(HashEmbeddings::new(64)),
            Arc::new(EchoModel),
        );
        let router = create_router(state.clone(), 1);
        (tmp, store, state, router)
    }

    fn multipart_body(filename: &str, content: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(filename: &str, content: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/upload-pdf")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(filename, content)))
            .unwrap()
    }

    fn chat_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (_tmp, _store, _state, router) = test_app().await;
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_upload_rejects_non_pdf() {
        let (_tmp, _store, _state, router) = test_app().await;
        let (status, body) = send(&router, upload_request("notes.txt", b"hello")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "invalid_upload");
        assert_eq!(body["message"], "Only PDF files are allowed");
    }

    #[tokio::test]
    async fn test_upload_corrupted_pdf_writes_nothing() {
        let (tmp, store, _state, router) = test_app().await;
        let (status, body) =
            send(&router, upload_request("broken.pdf", b"%PDF-1.4\nnot really")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unreadable_pdf");
        assert_eq!(store.count().await.unwrap(), 0);

        let leftovers = std::fs::read_dir(tmp.path().join("uploads")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_upload_multi_page_pdf() {
        let (tmp, store, _state, router) = test_app().await;
        let pdf = fixtures::pdf_with_pages(&[
            "Installation needs a grounded outlet",
            "Reset by holding the power button",
        ]);

        let (status, body) = send(&router, upload_request("manual.pdf", &pdf)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["filename"], "manual.pdf");
        assert_eq!(body["message"], "Successfully processed manual.pdf");
        assert_eq!(body["chunks_created"], 1);
        assert_eq!(body["chunks_replaced"], 0);
        assert_eq!(body["total_documents"], 1);

        let embedder = HashEmbeddings::new(64);
        let query = embedder.embed_query("power button").await.unwrap();
        let hits = store.query(&query, &embedder.identity(), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "manual.pdf");
        assert!(hits[0].text.contains("--- Page 1 ---"));
        assert!(hits[0].text.contains("--- Page 2 ---"));
        assert!(hits[0].text.contains("Installation"));
        assert!(hits[0].text.contains("power"));

        let leftovers = std::fs::read_dir(tmp.path().join("uploads")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_upload_encrypted_pdf_is_rejected() {
        let (_tmp, store, state, router) = test_app().await;
        state
            .processor
            .ingest_text("keep.pdf", "existing content")
            .await
            .unwrap();

        let (status, body) =
            send(&router, upload_request("locked.pdf", &fixtures::encrypted_pdf())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "unreadable_pdf");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upload_pdf_mentioning_encrypt_key() {
        let (_tmp, store, _state, router) = test_app().await;
        let pdf = fixtures::pdf_with_pages(&["The trailer key /Encrypt marks protected files"]);

        let (status, body) = send(&router, upload_request("security.pdf", &pdf)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chunks_created"], 1);
        assert_eq!(body["total_documents"], 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let (_tmp, _store, _state, router) = test_app().await;
        let body = format!("--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{b}--\r\n", b = BOUNDARY);
        let request = Request::builder()
            .method("POST")
            .uri("/upload-pdf")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No file uploaded");
    }

    #[tokio::test]
    async fn test_chat_on_empty_store() {
        let (_tmp, _store, _state, router) = test_app().await;
        let (status, body) = send(&router, chat_request(r#"{"question":"hi"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "empty_store");
    }

    #[tokio::test]
    async fn test_chat_malformed_json_is_bad_request() {
        let (_tmp, _store, _state, router) = test_app().await;
        let (status, body) = send(&router, chat_request("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_chat_returns_sources_after_ingest() {
        let (_tmp, _store, state, router) = test_app().await;
        state
            .processor
            .ingest_text("guide.pdf", "axum routers compose handlers and layers")
            .await
            .unwrap();

        let (status, body) = send(
            &router,
            chat_request(r#"{"question":"how do routers work","k":3}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["answer"], "echoed");
        assert_eq!(body["num_sources"], 1);
        assert_eq!(body["sources"][0]["source"], "guide.pdf");
        assert_eq!(body["sources"][0]["chunk_index"], 0);
    }

    #[tokio::test]
    async fn test_status_then_clear() {
        let (_tmp, _store, state, router) = test_app().await;
        state
            .processor
            .ingest_text("a.pdf", "some content to index")
            .await
            .unwrap();

        let (status, body) = send(&router, Request::get("/status").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["initialized"], true);
        assert_eq!(body["total_documents"], 1);
        assert_eq!(body["message"], "Vector store contains 1 document chunks");

        let clear = Request::delete("/clear").body(Body::empty()).unwrap();
        let (status, body) = send(&router, clear).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["removed"], 1);

        let (_, body) = send(&router, Request::get("/status").body(Body::empty()).unwrap()).await;
        assert_eq!(body["total_documents"], 0);
        assert_eq!(body["initialized"], false);

        let (status, body) = send(&router, chat_request(r#"{"question":"hi"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "empty_store");
    }

    #[tokio::test]
    async fn test_provider_info() {
        let (_tmp, _store, _state, router) = test_app().await;
        let request = Request::get("/provider-info").body(Body::empty()).unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["provider"], "ollama");
        assert_eq!(body["name"], "Ollama (Local)");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&RagError::EmptyStore), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&RagError::EmbeddingMismatch {
                expected: "a".into(),
                actual: "b".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&RagError::Provider(ProviderError::Timeout {
                provider: "openai".into(),
                secs: 30
            })),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RagError::Provider(ProviderError::Timeout {
                provider: "openai".into(),
                secs: 30
            })
            .code(),
            "provider_error"
        );
        assert_eq!(
            status_for(&RagError::Provider(ProviderError::MissingApiKey("OPENAI_API_KEY"))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&RagError::Storage(anyhow::anyhow!("disk"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_base_name_strips_directories() {
        assert_eq!(base_name("../../etc/report.pdf"), "report.pdf");
        assert_eq!(base_name("report.pdf"), "report.pdf");
    }
}
