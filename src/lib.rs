//! OpenSASE Returns
//!
//! Return and refund workflow for the OpenSASE e-commerce platform.
//!
//! ## Features
//! - Return requests against delivered orders, with a fixed return window
//! - Admin review: approve, process, complete or reject
//! - Stock restoration for completed returns
//! - Refund vouchers worth 110% of the refunded amount
//! - Customer and admin notifications over NATS

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub mod api;
pub mod config;
pub mod domain;
pub mod notify;
pub mod services;
pub mod store;

use domain::aggregates::ReturnError;
use domain::value_objects::{IdError, TermsError};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ReturnsError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ReturnsError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ReturnError> for ReturnsError {
    fn from(e: ReturnError) -> Self {
        match e {
            ReturnError::NotOwner => Self::Forbidden(e.to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<IdError> for ReturnsError {
    fn from(e: IdError) -> Self { Self::BadRequest(e.to_string()) }
}

impl From<TermsError> for ReturnsError {
    fn from(e: TermsError) -> Self { Self::BadRequest(e.to_string()) }
}

impl IntoResponse for ReturnsError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ReturnsError>;
