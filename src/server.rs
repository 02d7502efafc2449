//! HTTP API for the essay assistant UI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/search?keyword&type&minSimilarity&scope` | Ranked title matches |
//! | `GET`  | `/match?title&scope` | Best teacher-final revision for a draft title |
//! | `POST` | `/compare` | Draft vs. teacher-revision comparison |
//! | `GET`  | `/documents?scope&type` | Documents under a scope |
//! | `GET`  | `/documents/url?id&ttl` | Access URL for one document |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "keyword must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `configuration` (500),
//! `upstream` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser UI can be
//! served from a different origin.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::compare::{CompareRequest, Comparator, HttpFetcher};
use crate::config::Config;
use crate::error::ServiceError;
use crate::identifier::correct_identifier;
use crate::llm::{create_chat_model, ChatModel};
use crate::models::{ComparisonResult, ComparisonSource, DocumentRecord, RankedMatch, TypeFilter};
use crate::repository::DocumentRepository;
use crate::search::SearchService;
use crate::store::s3::S3Store;

/// Longest lifetime a signed URL may have (S3 presigning limit).
const MAX_URL_TTL_SECS: u64 = 7 * 24 * 3600;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    search: Arc<SearchService>,
    comparator: Arc<Comparator>,
}

impl AppState {
    pub fn new(search: SearchService, comparator: Comparator) -> Self {
        Self {
            search: Arc::new(search),
            comparator: Arc::new(comparator),
        }
    }

    /// Wire the S3 store, HTTP fetcher, and chat model from configuration.
    ///
    /// A model that cannot be built (disabled, missing key) is logged and left
    /// out; `/compare` then answers simulated requests only.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(S3Store::from_config(&config.storage)?);
        let repository = DocumentRepository::new(
            store,
            &config.storage,
            config.search.suffix_tokens.clone(),
        );

        let model: Option<Arc<dyn ChatModel>> = if config.llm.enabled {
            match create_chat_model(&config.llm) {
                Ok(model) => Some(model),
                Err(e) => {
                    warn!(error = %e, "language model unavailable; only simulated comparisons will succeed");
                    None
                }
            }
        } else {
            None
        };

        let comparator = Comparator::new(
            repository.clone(),
            Arc::new(HttpFetcher::new()?),
            model,
            config.llm.max_input_chars,
        );
        let search = SearchService::new(
            repository,
            &config.storage.default_scope,
            &config.search,
        );
        Ok(Self::new(search, comparator))
    }

    pub fn search(&self) -> &SearchService {
        &self.search
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }
}

/// Build the router with CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(handle_search))
        .route("/match", get(handle_match))
        .route("/compare", post(handle_compare))
        .route("/documents", get(handle_documents))
        .route("/documents/url", get(handle_document_url))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("essay-review listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: &'static str,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let (status, code) = match &err {
            ServiceError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ServiceError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration"),
            ServiceError::Transport(_) | ServiceError::Parse(_) => {
                (StatusCode::BAD_GATEWAY, "upstream")
            }
        };
        if status.is_server_error() {
            warn!(error = %err, "request failed");
        }
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

fn parse_type_filter(value: Option<&str>) -> Result<TypeFilter, AppError> {
    Ok(value.unwrap_or("all").parse::<TypeFilter>()?)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /search ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    keyword: Option<String>,
    #[serde(rename = "type")]
    doc_type: Option<String>,
    min_similarity: Option<f64>,
    scope: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    success: bool,
    keyword: String,
    scope: String,
    total: usize,
    matches: Vec<RankedMatch>,
}

async fn handle_search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Query(params) = params?;
    let keyword = params
        .keyword
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("keyword must not be empty"))?;
    let type_filter = parse_type_filter(params.doc_type.as_deref())?;
    let min_similarity = params
        .min_similarity
        .unwrap_or_else(|| state.search.min_similarity());
    let scope = state.search.scope_or_default(params.scope.as_deref());

    let matches = state
        .search
        .search(scope, &keyword, type_filter, min_similarity)
        .await?;

    Ok(Json(SearchResponse {
        success: true,
        scope: scope.to_string(),
        total: matches.len(),
        keyword,
        matches,
    }))
}

// ============ GET /match ============

#[derive(Debug, Deserialize)]
struct MatchParams {
    title: Option<String>,
    scope: Option<String>,
}

#[derive(Serialize)]
struct MatchResponse {
    success: bool,
    title: String,
    #[serde(rename = "match")]
    best: Option<RankedMatch>,
}

async fn handle_match(
    State(state): State<AppState>,
    params: Result<Query<MatchParams>, QueryRejection>,
) -> Result<Json<MatchResponse>, AppError> {
    let Query(params) = params?;
    let title = params
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("title must not be empty"))?;
    let scope = state.search.scope_or_default(params.scope.as_deref());

    let best = state.search.auto_match(scope, &title).await?;
    Ok(Json(MatchResponse {
        success: true,
        title,
        best,
    }))
}

// ============ POST /compare ============

#[derive(Serialize)]
struct CompareResponse {
    success: bool,
    result: ComparisonResult,
    source: ComparisonSource,
}

async fn handle_compare(
    State(state): State<AppState>,
    body: Result<Json<CompareRequest>, JsonRejection>,
) -> Result<Json<CompareResponse>, AppError> {
    let Json(request) = body?;
    let outcome = state.comparator.compare(&request).await?;
    Ok(Json(CompareResponse {
        success: true,
        result: outcome.result,
        source: outcome.source,
    }))
}

// ============ GET /documents ============

#[derive(Debug, Deserialize)]
struct DocumentsParams {
    scope: Option<String>,
    #[serde(rename = "type")]
    doc_type: Option<String>,
}

#[derive(Serialize)]
struct DocumentsResponse {
    success: bool,
    scope: String,
    total: usize,
    documents: Vec<DocumentRecord>,
}

async fn handle_documents(
    State(state): State<AppState>,
    params: Result<Query<DocumentsParams>, QueryRejection>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let Query(params) = params?;
    let type_filter = parse_type_filter(params.doc_type.as_deref())?;
    let scope = state.search.scope_or_default(params.scope.as_deref());

    let documents = state.search.documents(scope, type_filter).await?;
    Ok(Json(DocumentsResponse {
        success: true,
        scope: scope.to_string(),
        total: documents.len(),
        documents,
    }))
}

// ============ GET /documents/url ============

#[derive(Debug, Deserialize)]
struct UrlParams {
    id: Option<String>,
    ttl: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UrlResponse {
    id: String,
    corrected_id: String,
    url: String,
    kind: &'static str,
}

async fn handle_document_url(
    State(state): State<AppState>,
    params: Result<Query<UrlParams>, QueryRejection>,
) -> Result<Json<UrlResponse>, AppError> {
    let Query(params) = params?;
    let id = params
        .id
        .filter(|i| !i.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("id must not be empty"))?;
    let repository = state.search.repository();
    let ttl = match params.ttl {
        None => repository.default_ttl(),
        Some(secs) if (1..=MAX_URL_TTL_SECS).contains(&secs) => Duration::from_secs(secs),
        Some(secs) => {
            return Err(AppError::bad_request(format!(
                "ttl must be in [1, {}], got {}",
                MAX_URL_TTL_SECS, secs
            )))
        }
    };

    if !repository.exists(&id).await? {
        return Err(AppError::not_found(format!("document not found: {}", id)));
    }

    let location = repository.resolve_access_url(&id, ttl).await;
    Ok(Json(UrlResponse {
        corrected_id: correct_identifier(&id).into_owned(),
        url: location.as_str().to_string(),
        kind: location.kind(),
        id,
    }))
}
