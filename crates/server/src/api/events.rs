//! Ingest and event query endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use pulse_core::IngestEvent;
use pulse_storage::{EventFilter, EventRow};

use crate::state::AppState;

use super::{
    bad_request, clamp_limit, clamp_offset, from_body, internal_error, not_found,
    validation_failed, ApiResult, ErrorResponse, Page,
};

// ── Ingest ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AcceptedEvent {
    pub status: &'static str,
    pub event_id: Uuid,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AcceptedBatch {
    pub status: &'static str,
    pub count: usize,
    pub event_ids: Vec<Uuid>,
}

/// Accept a single event: validate, assign identity, enqueue.
///
/// The enqueue is fire-and-forget — append failures are logged, the client
/// still gets its 202 with the reserved `event_id`.
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "Events",
    request_body(content = Object, description = "Event JSON"),
    responses(
        (status = 202, description = "Event accepted", body = AcceptedEvent),
        (status = 400, description = "Validation failure", body = ErrorResponse)
    )
)]
pub(crate) async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<AcceptedEvent>)> {
    let body: IngestEvent = from_body(body)?;
    body.validate().map_err(validation_failed)?;
    let event = body.into_event();
    let event_id = event.event_id;

    let producer = state.producer.clone();
    tokio::spawn(async move {
        if let Err(e) = producer.enqueue(&event).await {
            warn!(event_id = %event.event_id, error = %e, "event enqueue failed, dropped");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedEvent {
            status: "accepted",
            event_id,
        }),
    ))
}

/// Accept a batch. The whole batch is rejected if any element fails
/// validation; otherwise every event is enqueued concurrently.
#[utoipa::path(
    post,
    path = "/api/v1/events/batch",
    tag = "Events",
    request_body(content = Object, description = "Array of event JSON objects"),
    responses(
        (status = 202, description = "Batch accepted", body = AcceptedBatch),
        (status = 400, description = "Validation failure", body = ErrorResponse)
    )
)]
pub(crate) async fn ingest_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<AcceptedBatch>)> {
    let body: Vec<IngestEvent> = from_body(body)?;
    if body.is_empty() {
        return Err(bad_request("batch must contain at least one event"));
    }

    let mut issues = Vec::new();
    for (index, event) in body.iter().enumerate() {
        if let Err(e) = event.validate() {
            issues.extend(e.issues.into_iter().map(|i| format!("[{}] {}", index, i)));
        }
    }
    if !issues.is_empty() {
        return Err(validation_failed(pulse_core::ValidationError { issues }));
    }

    let events: Vec<_> = body.into_iter().map(IngestEvent::into_event).collect();
    let event_ids: Vec<Uuid> = events.iter().map(|e| e.event_id).collect();

    for event in events {
        let producer = state.producer.clone();
        tokio::spawn(async move {
            if let Err(e) = producer.enqueue(&event).await {
                warn!(event_id = %event.event_id, error = %e, "event enqueue failed, dropped");
            }
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedBatch {
            status: "accepted",
            count: event_ids.len(),
            event_ids,
        }),
    ))
}

// ── Queries ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct EventListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[utoipa::path(
    get,
    path = "/api/v1/events",
    tag = "Events",
    params(EventListParams),
    responses((status = 200, description = "Paginated events", body = Object))
)]
pub(crate) async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventListParams>,
) -> ApiResult<Json<Page<EventRow>>> {
    let limit = clamp_limit(params.limit);
    let offset = clamp_offset(params.offset);
    let filter = EventFilter {
        limit,
        offset,
        event_type: params.event_type,
        source: params.source,
        from: params.from,
        to: params.to,
    };
    let rows = state.events.list(&filter).await.map_err(internal_error)?;
    Ok(Json(Page::new(rows, limit, offset)))
}

#[utoipa::path(
    get,
    path = "/api/v1/events/{id}",
    tag = "Events",
    params(("id" = Uuid, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event row", body = Object),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub(crate) async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EventRow>> {
    state
        .events
        .get(id)
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("event not found: {}", id)))
}

// ── Health ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub redis: &'static str,
    pub worker: &'static str,
}

/// Ping the stream layer and report worker liveness from the TTL-bounded
/// health key.
#[utoipa::path(
    get,
    path = "/api/v1/events/health",
    tag = "Events",
    responses(
        (status = 200, description = "Healthy", body = HealthResponse),
        (status = 503, description = "Stream layer unreachable", body = HealthResponse)
    )
)]
pub(crate) async fn events_health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    if let Err(e) = pulse_stream::ping(&state.redis).await {
        warn!(error = %e, "redis ping failed");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "error",
                redis: "error",
                worker: "unknown",
            }),
        ));
    }

    let worker = match pulse_stream::read_worker_health(&state.redis).await {
        Ok(Some(_)) => "ok",
        _ => "stale",
    };

    Ok(Json(HealthResponse {
        status: "ok",
        redis: "ok",
        worker,
    }))
}
