//! Anomaly query endpoint.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use pulse_core::Severity;
use pulse_storage::{AnomalyFilter, AnomalyRow};

use crate::state::AppState;

use super::{
    bad_request, clamp_limit, clamp_offset, internal_error, ApiResult, ErrorResponse, Page,
};

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct AnomalyListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub rule_id: Option<String>,
    pub severity: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/anomalies",
    tag = "Anomalies",
    params(AnomalyListParams),
    responses(
        (status = 200, description = "Paginated anomalies", body = Object),
        (status = 400, description = "Bad severity", body = ErrorResponse)
    )
)]
pub(crate) async fn list_anomalies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnomalyListParams>,
) -> ApiResult<Json<Page<AnomalyRow>>> {
    if let Some(severity) = &params.severity {
        severity
            .parse::<Severity>()
            .map_err(|e| bad_request(e))?;
    }

    let limit = clamp_limit(params.limit);
    let offset = clamp_offset(params.offset);
    let filter = AnomalyFilter {
        limit,
        offset,
        rule_id: params.rule_id,
        severity: params.severity,
    };
    let rows = state.anomalies.list(&filter).await.map_err(internal_error)?;
    Ok(Json(Page::new(rows, limit, offset)))
}
