//! Shared helpers and type aliases for the `/api/v1` endpoints.

pub mod anomalies;
pub mod events;
pub mod metrics;
pub mod rules;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use pulse_core::ValidationError;

// ── Error envelope ──────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);
pub(crate) type ApiResult<T> = Result<T, ApiError>;

pub(crate) fn bad_request(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: msg.into(),
            issues: Vec::new(),
        }),
    )
}

pub(crate) fn validation_failed(err: ValidationError) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "validation failed".to_string(),
            issues: err.issues,
        }),
    )
}

pub(crate) fn not_found(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: msg.into(),
            issues: Vec::new(),
        }),
    )
}

pub(crate) fn internal_error(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
            issues: Vec::new(),
        }),
    )
}

/// Deserialize a JSON body into `T`, mapping failures to a 400 with the
/// serde error as the issue (axum's default Json rejection is a 422).
pub(crate) fn from_body<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "validation failed".to_string(),
                issues: vec![e.to_string()],
            }),
        )
    })
}

// ── Pagination ──────────────────────────────────────────────────

/// Clamp a requested page size into `[1, 500]`, defaulting to 50.
pub(crate) fn clamp_limit(raw: Option<i64>) -> i64 {
    raw.unwrap_or(50).clamp(1, 500)
}

pub(crate) fn clamp_offset(raw: Option<i64>) -> i64 {
    raw.unwrap_or(0).max(0)
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    /// Number of rows in this page.
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T: Serialize> Page<T> {
    pub fn new(data: Vec<T>, limit: i64, offset: i64) -> Self {
        let count = data.len();
        Self {
            data,
            pagination: Pagination {
                limit,
                offset,
                count,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamps_into_range() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(9999)), 500);
        assert_eq!(clamp_limit(Some(120)), 120);
    }

    #[test]
    fn offset_never_negative() {
        assert_eq!(clamp_offset(None), 0);
        assert_eq!(clamp_offset(Some(-1)), 0);
        assert_eq!(clamp_offset(Some(30)), 30);
    }
}
