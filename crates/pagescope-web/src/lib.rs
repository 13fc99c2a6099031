//! Axum JSON API for stored company pages, mounted under `/api/v1`.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pagescope_core::{
    Comment, Employee, Page, PageFilter, PageRequest, PageWithDetails, Paginated, Post, StoreStats,
};
use pagescope_ingest::{EnsureOptions, IngestConfig, IngestError, IngestOptions, Orchestrator};
use pagescope_storage::{EntityStore, MemoryStore, PgStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "pagescope-web";
pub const SERVICE_NAME: &str = "Company Page Insights";

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    fn store(&self) -> &Arc<dyn EntityStore> {
        self.orchestrator.store()
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("PAGESCOPE_WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PAGESCOPE_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Internal(String),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::NotFound(page_id) => {
                ApiError::NotFound(format!("Page '{page_id}' not found"))
            }
            IngestError::LoginFailed(msg) => ApiError::Internal(format!("Failed to log in: {msg}")),
            other => ApiError::Internal(format!("Scraping error: {other}")),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

fn check_range(field: &str, value: u32, min: u32, max: u32) -> Result<(), ApiError> {
    if value < min || value > max {
        return Err(ApiError::Validation(format!(
            "{field} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct DetailParams {
    #[serde(default = "default_true")]
    include_posts: bool,
    #[serde(default = "default_true")]
    include_employees: bool,
    #[serde(default)]
    force_scrape: bool,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    min_followers: Option<u64>,
    max_followers: Option<u64>,
    name: Option<String>,
    industry: Option<String>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "SearchParams::default_page_size")]
    page_size: u32,
}

impl SearchParams {
    fn default_page_size() -> u32 {
        10
    }
}

#[derive(Debug, Deserialize)]
struct PostsParams {
    #[serde(default = "PostsParams::default_limit")]
    limit: u32,
}

impl PostsParams {
    fn default_limit() -> u32 {
        15
    }
}

#[derive(Debug, Deserialize)]
struct EmployeesParams {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "EmployeesParams::default_page_size")]
    page_size: u32,
}

impl EmployeesParams {
    fn default_page_size() -> u32 {
        20
    }
}

#[derive(Debug, Deserialize)]
struct ScrapeParams {
    #[serde(default = "default_true")]
    scrape_posts: bool,
    #[serde(default = "default_true")]
    scrape_employees: bool,
    #[serde(default)]
    scrape_comments: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub message: String,
    pub page_id: String,
    pub page_name: String,
    pub posts_scraped: usize,
    pub employees_scraped: usize,
    pub comments_scraped: usize,
}

pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/pages", get(search_pages_handler))
        .route(
            "/pages/{page_id}",
            get(page_detail_handler).delete(delete_page_handler),
        )
        .route("/pages/{page_id}/posts", get(page_posts_handler))
        .route("/pages/{page_id}/employees", get(page_employees_handler))
        .route("/pages/{page_id}/scrape", post(scrape_page_handler))
        .route("/posts/{post_id}/comments", get(post_comments_handler))
        .route("/stats", get(stats_handler));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Connect to Postgres (running migrations) when a database URL is given,
/// otherwise fall back to a process-local store.
pub async fn connect_store(database_url: Option<&str>) -> anyhow::Result<Arc<dyn EntityStore>> {
    match database_url {
        Some(url) => {
            let store = PgStore::connect(url, 5).await?;
            store.migrate().await?;
            info!("connected to postgres");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = WebConfig::from_env();
    let store = connect_store(config.database_url.as_deref()).await?;
    let orchestrator = Arc::new(Orchestrator::from_config(store, &IngestConfig::from_env()));

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(host = %config.host, port = config.port, "listening");
    axum::serve(listener, app(AppState::new(orchestrator.clone())))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
            }
        })
        .await?;

    orchestrator.close().await;
    Ok(())
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "message": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store().ping().await {
        Ok(()) => Json(json!({ "status": "healthy" })).into_response(),
        Err(err) => {
            warn!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy" })),
            )
                .into_response()
        }
    }
}

async fn require_page(state: &AppState, page_id: &str) -> Result<Page, ApiError> {
    state
        .store()
        .get_page(page_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Page '{page_id}' not found in database")))
}

async fn page_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    params: Result<Query<DetailParams>, QueryRejection>,
) -> Result<Json<PageWithDetails>, ApiError> {
    let Query(params) = params?;
    let options = EnsureOptions {
        force_rescrape: params.force_scrape,
        include_posts: params.include_posts,
        include_employees: params.include_employees,
    };
    let details = state.orchestrator.ensure_page(&page_id, options).await?;
    Ok(Json(details))
}

async fn search_pages_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Paginated<Page>>, ApiError> {
    let Query(params) = params?;
    check_range("page", params.page, 1, u32::MAX)?;
    check_range("page_size", params.page_size, 1, 100)?;

    let filter = PageFilter {
        min_followers: params.min_followers,
        max_followers: params.max_followers,
        name: params.name,
        industry: params.industry,
    };
    let request = PageRequest::new(params.page, params.page_size);
    let (items, total) = state.store().search_pages(&filter, request).await?;
    Ok(Json(Paginated::new(items, total, request)))
}

async fn page_posts_handler(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    params: Result<Query<PostsParams>, QueryRejection>,
) -> Result<Json<Vec<Post>>, ApiError> {
    let Query(params) = params?;
    check_range("limit", params.limit, 1, 50)?;
    require_page(&state, &page_id).await?;
    let posts = state
        .store()
        .get_posts_by_page(&page_id, params.limit as usize)
        .await?;
    Ok(Json(posts))
}

async fn page_employees_handler(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    params: Result<Query<EmployeesParams>, QueryRejection>,
) -> Result<Json<Paginated<Employee>>, ApiError> {
    let Query(params) = params?;
    check_range("page", params.page, 1, u32::MAX)?;
    check_range("page_size", params.page_size, 1, 100)?;
    require_page(&state, &page_id).await?;

    let request = PageRequest::new(params.page, params.page_size);
    let (items, total) = state.store().get_employees_by_page(&page_id, request).await?;
    Ok(Json(Paginated::new(items, total, request)))
}

async fn scrape_page_handler(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    params: Result<Query<ScrapeParams>, QueryRejection>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    let Query(params) = params?;
    let options = IngestOptions {
        scrape_posts: params.scrape_posts,
        scrape_employees: params.scrape_employees,
        scrape_comments: params.scrape_comments,
    };
    let summary = state.orchestrator.force_ingest(&page_id, options).await?;
    Ok(Json(ScrapeResponse {
        message: "Scraping completed successfully".to_string(),
        page_id: summary.page_id,
        page_name: summary.page_name,
        posts_scraped: summary.posts_ingested,
        employees_scraped: summary.employees_ingested,
        comments_scraped: summary.comments_ingested,
    }))
}

async fn delete_page_handler(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store()
        .get_page(&page_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Page '{page_id}' not found")))?;
    state.store().delete_page_cascade(&page_id).await?;
    info!(page_id, "page deleted");
    Ok(Json(json!({
        "message": format!("Page '{page_id}' and all related data deleted successfully")
    })))
}

async fn post_comments_handler(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<String>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    Ok(Json(state.store().get_comments_by_post(&post_id).await?))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<StoreStats>, ApiError> {
    Ok(Json(state.store().count_all().await?))
}
