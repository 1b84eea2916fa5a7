use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use hyper::Server;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

use crate::constants::COURSES_COLLECTION;
use crate::error::ScraperError;
use crate::query::{self, COURSE_FIELDS, OPTION_FIELDS};
use crate::storage::DocumentStore;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn DocumentStore>,
    option_collections: Arc<HashSet<String>>,
}

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: String) -> Self {
        Self { status: StatusCode::NOT_FOUND, message }
    }
}

impl From<ScraperError> for ApiError {
    fn from(err: ScraperError) -> Self {
        match err {
            ScraperError::InvalidQuery(message) => Self { status: StatusCode::BAD_REQUEST, message },
            other => {
                error!("read api: {}", other);
                Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: other.to_string() }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { code: self.status.as_u16(), message: self.message };
        (self.status, Json(body)).into_response()
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "timetable-scraper",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn prometheus_metrics() -> Response {
    match crate::metrics::render() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "metrics recorder not installed".into(),
        }
        .into_response(),
    }
}

/// Sections matching the course filters.
async fn list_sections(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let find = query::build_query(COURSE_FIELDS, &params)?;
    let sections = state.store.find(COURSES_COLLECTION, &find).await?;
    debug!("read api: {} sections", sections.len());
    Ok(Json(sections))
}

/// Matching sections grouped under their course.
async fn list_courses(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let find = query::build_query(COURSE_FIELDS, &params)?;
    let sections = state.store.find(COURSES_COLLECTION, &find).await?;
    Ok(Json(query::group_courses(sections)))
}

async fn list_options(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    if !state.option_collections.contains(&collection) {
        return Err(ApiError::not_found(format!("unknown collection '{collection}'")));
    }
    let find = query::build_query(OPTION_FIELDS, &params)?;
    let options = state.store.find(&collection, &find).await?;
    debug!("read api: {} documents in {}", options.len(), collection);
    Ok(Json(options))
}

/// Read API over the published collections.
pub fn create_router(store: Arc<dyn DocumentStore>, option_collections: impl IntoIterator<Item = String>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    let state = AppState {
        store,
        option_collections: Arc::new(option_collections.into_iter().collect()),
    };

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/courses", get(list_courses))
        .route("/sections", get(list_sections))
        .route("/:collection", get(list_options))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(cors))
}

/// Serve the read API until Ctrl-C.
pub async fn start_server(
    store: Arc<dyn DocumentStore>,
    option_collections: Vec<String>,
    port: u16,
) -> anyhow::Result<()> {
    let app = create_router(store, option_collections);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Read API listening on http://localhost:{port}");
    info!("Health check: http://localhost:{port}/health");

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down read API");
        })
        .await?;

    Ok(())
}
