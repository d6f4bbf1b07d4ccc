//! HTTP router construction.
//!
//! Assembles the `/api/v1` routes, the manual `/ws` upgrade, CORS, and the
//! OpenAPI docs into a single `Router`.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::state::AppState;
use crate::{api, ws};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::events::ingest_event,
        api::events::ingest_batch,
        api::events::list_events,
        api::events::get_event,
        api::events::events_health,
        api::anomalies::list_anomalies,
        api::metrics::metrics,
        api::rules::create_rule,
        api::rules::list_rules,
        api::rules::get_rule,
        api::rules::update_rule,
        api::rules::patch_rule,
        api::rules::delete_rule,
    ),
    components(schemas(
        api::ErrorResponse,
        api::Pagination,
        api::events::AcceptedEvent,
        api::events::AcceptedBatch,
        api::events::HealthResponse,
        api::metrics::MetricBucket,
        api::metrics::MetricsResponse,
    )),
    tags(
        (name = "Events", description = "Ingestion and event queries"),
        (name = "Anomalies", description = "Detected anomalies"),
        (name = "Metrics", description = "Windowed event rates"),
        (name = "Rules", description = "Detection rule CRUD"),
    )
)]
struct ApiDoc;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/events",
            get(api::events::list_events).post(api::events::ingest_event),
        )
        // Fixed segments must precede the id capture.
        .route("/api/v1/events/batch", axum::routing::post(api::events::ingest_batch))
        .route("/api/v1/events/health", get(api::events::events_health))
        .route("/api/v1/events/{id}", get(api::events::get_event))
        .route("/api/v1/anomalies", get(api::anomalies::list_anomalies))
        .route("/api/v1/metrics", get(api::metrics::metrics))
        .route(
            "/api/v1/rules",
            get(api::rules::list_rules).post(api::rules::create_rule),
        )
        .route(
            "/api/v1/rules/{id}",
            get(api::rules::get_rule)
                .put(api::rules::update_rule)
                .patch(api::rules::patch_rule)
                .delete(api::rules::delete_rule),
        )
        .route("/ws", get(ws::ws_upgrade))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
