// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Domain-level error kinds surfaced to HTTP/WebSocket callers.
///
/// Distinct from internal fallible code, which propagates `anyhow::Error`
/// through `?` and is only ever turned into one of these at the transport
/// boundary. Callers match on the variant (e.g. `http_api.rs`'s tests match
/// `Conflict { code, .. }`), so this is one of the small set of typed error
/// enums that earns `thiserror` over a hand-rolled `Display` impl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum DashboardError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad_request")]
    BadRequest,
    #[error("not_found")]
    NotFound,
    /// Pre-validation refused a command dispatch. Carries the
    /// machine-readable code used in the 409 body, e.g. `git_outdated`.
    #[error("{code}: {message}")]
    Conflict { code: String, message: String },
    #[error("upstream_error")]
    Upstream,
    #[error("internal")]
    Internal,
}

impl DashboardError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict { .. } => 409,
            Self::Upstream => 502,
            Self::Internal => 500,
        }
    }

    pub fn code(&self) -> String {
        match self {
            Self::Unauthorized => "unauthorized".to_owned(),
            Self::BadRequest => "bad_request".to_owned(),
            Self::NotFound => "not_found".to_owned(),
            Self::Conflict { code, .. } => code.clone(),
            Self::Upstream => "upstream_error".to_owned(),
            Self::Internal => "internal".to_owned(),
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.code(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }

    /// Build a pre-validation conflict, the common case in the precheck table.
    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict { code: code.into(), message: message.into() }
    }
}

impl axum::response::IntoResponse for DashboardError {
    fn into_response(self) -> axum::response::Response {
        let message = match &self {
            Self::Conflict { message, .. } => message.clone(),
            other => other.code(),
        };
        self.to_http_response(message).into_response()
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
