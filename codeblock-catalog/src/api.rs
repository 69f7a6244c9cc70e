//! REST API over the catalog.
//!
//! | Method | Path                          | Response                    |
//! |--------|-------------------------------|-----------------------------|
//! | GET    | `/api/health`                 | `{status, version, codeBlocks}` |
//! | GET    | `/api/codeblocks`             | `[CodeBlock]`               |
//! | GET    | `/api/codeblock/:id`          | `CodeBlock`                 |
//! | GET    | `/api/codeblock/:id/rating`   | `{averageRating, numRatings}` |
//! | POST   | `/api/codeblock/:id/rating`   | `{averageRating, numRatings}` |

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::error::CatalogError;
use crate::model::{CodeBlock, RatingSummary};
use crate::store::CatalogStore;

/// Body of a rating submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RatingRequest {
    pub rating: i64,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub code_blocks: usize,
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CatalogError::NotFound(_) => (StatusCode::NOT_FOUND, "Code block not found".to_string()),
            CatalogError::InvalidRating(_) | CatalogError::MalformedRating(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            _ => {
                log::error!("Catalog request failed: {self}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Server Error".to_string())
            }
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

/// Create the HTTP router with all routes configured
pub fn create_router(store: Arc<CatalogStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/codeblocks", get(list_code_blocks))
        .route("/api/codeblock/:id", get(get_code_block))
        .route("/api/codeblock/:id/rating", get(get_rating).post(submit_rating))
        .layer(cors)
        .with_state(store)
}

/// GET /api/health
pub async fn health(State(store): State<Arc<CatalogStore>>) -> Result<Json<HealthResponse>, CatalogError> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        code_blocks: store.len()?,
    }))
}

/// GET /api/codeblocks
pub async fn list_code_blocks(
    State(store): State<Arc<CatalogStore>>,
) -> Result<Json<Vec<CodeBlock>>, CatalogError> {
    Ok(Json(store.list()?))
}

/// GET /api/codeblock/:id
pub async fn get_code_block(
    State(store): State<Arc<CatalogStore>>,
    Path(id): Path<String>,
) -> Result<Json<CodeBlock>, CatalogError> {
    Ok(Json(store.get_by_str(&id)?))
}

/// GET /api/codeblock/:id/rating
pub async fn get_rating(
    State(store): State<Arc<CatalogStore>>,
    Path(id): Path<String>,
) -> Result<Json<RatingSummary>, CatalogError> {
    Ok(Json(store.get_by_str(&id)?.rating_summary()))
}

/// POST /api/codeblock/:id/rating
pub async fn submit_rating(
    State(store): State<Arc<CatalogStore>>,
    Path(id): Path<String>,
    request: Result<Json<RatingRequest>, JsonRejection>,
) -> Result<Json<RatingSummary>, CatalogError> {
    let block = store.get_by_str(&id)?;
    let Json(request) = request.map_err(|e| CatalogError::MalformedRating(e.body_text()))?;
    Ok(Json(store.submit_rating(block.id, request.rating)?))
}
