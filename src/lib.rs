//! Electroshop Storefront Service
//!
//! Self-hosted electronics storefront: category-browsable catalog,
//! session/user-scoped carts, order checkout.
//!
//! ## Features
//! - Product catalog with per-kind attribute sets (notebooks, smartphones)
//! - Shopping cart with derived totals recomputed on every mutation
//! - Transactional order placement
//! - Back-office endpoints for catalog and order management

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

pub mod admin;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod events;
pub mod handlers;
pub mod models;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub nats: Option<async_nats::Client>,
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("not found")]
    NotFound,

    #[error("validation failed")]
    Validation(#[from] validator::ValidationErrors),

    #[error("authentication required")]
    Unauthorized,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("media store error: {0}")]
    Media(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShopError>;

impl IntoResponse for ShopError {
    fn into_response(self) -> Response {
        match self {
            ShopError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
            }
            ShopError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": "validation failed", "fields": errors})),
            )
                .into_response(),
            ShopError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "authentication required"})),
            )
                .into_response(),
            ShopError::Storage(e) => {
                tracing::error!(error = %e, "database failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "internal error"})),
                )
                    .into_response()
            }
            ShopError::Media(e) => {
                tracing::error!(error = %e, "media store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "internal error"})),
                )
                    .into_response()
            }
        }
    }
}
