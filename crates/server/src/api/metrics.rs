//! Windowed event-rate metrics.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use pulse_storage::GroupBy;

use crate::state::AppState;

use super::{bad_request, internal_error, ApiResult, ErrorResponse};

const MIN_WINDOW_SECS: i64 = 10;
const MAX_WINDOW_SECS: i64 = 3600;
const DEFAULT_WINDOW_SECS: i64 = 60;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct MetricsParams {
    pub window_seconds: Option<i64>,
    /// `event_type` (default) or `source`.
    pub group_by: Option<String>,
    pub event_type: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MetricBucket {
    pub key: String,
    pub count: i64,
    pub rate_per_sec: f64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MetricsResponse {
    pub window_seconds: i64,
    pub group_by: &'static str,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub metrics: Vec<MetricBucket>,
}

#[utoipa::path(
    get,
    path = "/api/v1/metrics",
    tag = "Metrics",
    params(MetricsParams),
    responses(
        (status = 200, description = "Per-key event counts and rates", body = MetricsResponse),
        (status = 400, description = "Bad group_by", body = ErrorResponse)
    )
)]
pub(crate) async fn metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsParams>,
) -> ApiResult<Json<MetricsResponse>> {
    let window_seconds = params
        .window_seconds
        .unwrap_or(DEFAULT_WINDOW_SECS)
        .clamp(MIN_WINDOW_SECS, MAX_WINDOW_SECS);

    let (group_by, group_by_name) = match params.group_by.as_deref() {
        None | Some("event_type") => (GroupBy::EventType, "event_type"),
        Some("source") => (GroupBy::Source, "source"),
        Some(other) => {
            return Err(bad_request(format!(
                "group_by must be 'event_type' or 'source', got '{}'",
                other
            )))
        }
    };

    let to = Utc::now();
    let from = to - Duration::seconds(window_seconds);

    let rows = state
        .events
        .metrics(
            group_by,
            from,
            to,
            params.event_type.as_deref(),
            params.source.as_deref(),
        )
        .await
        .map_err(internal_error)?;

    let metrics = rows
        .into_iter()
        .map(|r| MetricBucket {
            key: r.key,
            count: r.count,
            rate_per_sec: r.count as f64 / window_seconds as f64,
        })
        .collect();

    Ok(Json(MetricsResponse {
        window_seconds,
        group_by: group_by_name,
        from,
        to,
        metrics,
    }))
}
