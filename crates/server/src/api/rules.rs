//! Rule CRUD endpoints.
//!
//! Every successful mutation publishes a `rules_changed` message so workers
//! can hot-reload their snapshot. Publish failures are logged and swallowed:
//! the HTTP response must never depend on the pub/sub layer.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use pulse_core::{
    RuleChange, RuleChangeReason, RuleCondition, Severity, ValidationError, MAX_NAME_LEN,
};
use pulse_storage::{NewRule, RulePatch, RuleRow};
use pulse_stream::{publish_json, RULES_CHANGED_CHANNEL};

use crate::state::AppState;

use super::{
    from_body, internal_error, not_found, validation_failed, ApiResult, ErrorResponse,
};

// ── Request shapes ──────────────────────────────────────────────

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleRequest {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub severity: Severity,
    pub window_seconds: u32,
    #[serde(default)]
    pub cooldown_seconds: u32,
    pub condition: RuleCondition,
}

impl RuleRequest {
    fn validate(self) -> Result<NewRule, ValidationError> {
        let mut issues = Vec::new();
        check_name(&self.name, &mut issues);
        check_window(self.window_seconds, &mut issues);
        check_condition(&self.condition, &mut issues);

        if issues.is_empty() {
            Ok(NewRule {
                name: self.name,
                enabled: self.enabled,
                severity: self.severity,
                window_seconds: self.window_seconds,
                cooldown_seconds: self.cooldown_seconds,
                condition: self.condition,
            })
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulePatchRequest {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub severity: Option<Severity>,
    pub window_seconds: Option<u32>,
    pub cooldown_seconds: Option<u32>,
    pub condition: Option<RuleCondition>,
}

impl RulePatchRequest {
    fn validate(self) -> Result<RulePatch, ValidationError> {
        let mut issues = Vec::new();
        if let Some(name) = &self.name {
            check_name(name, &mut issues);
        }
        if let Some(window) = self.window_seconds {
            check_window(window, &mut issues);
        }
        if let Some(condition) = &self.condition {
            check_condition(condition, &mut issues);
        }

        let patch = RulePatch {
            name: self.name,
            enabled: self.enabled,
            severity: self.severity,
            window_seconds: self.window_seconds,
            cooldown_seconds: self.cooldown_seconds,
            condition: self.condition,
        };
        if patch.is_empty() {
            issues.push("patch must set at least one field".to_string());
        }

        if issues.is_empty() {
            Ok(patch)
        } else {
            Err(ValidationError { issues })
        }
    }
}

fn check_name(name: &str, issues: &mut Vec<String>) {
    if name.is_empty() {
        issues.push("name must not be empty".to_string());
    } else if name.len() > MAX_NAME_LEN {
        issues.push(format!("name exceeds {} characters", MAX_NAME_LEN));
    }
}

fn check_window(window_seconds: u32, issues: &mut Vec<String>) {
    if window_seconds == 0 {
        issues.push("window_seconds must be at least 1".to_string());
    }
}

fn check_condition(condition: &RuleCondition, issues: &mut Vec<String>) {
    if !condition.value.is_finite() {
        issues.push("condition.value must be a finite number".to_string());
    }
}

// ── Change notification ─────────────────────────────────────────

async fn publish_rule_change(state: &AppState, reason: RuleChangeReason, rule_id: Uuid) {
    let change = RuleChange {
        ts: Utc::now(),
        reason,
        rule_id,
    };
    let value = match serde_json::to_value(&change) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "failed to serialize rule change");
            return;
        }
    };
    if let Err(e) = publish_json(&state.redis, RULES_CHANGED_CHANNEL, &value).await {
        warn!(rule_id = %rule_id, error = %e, "rules_changed publish failed");
    }
}

// ── Handlers ────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/api/v1/rules",
    tag = "Rules",
    request_body(content = Object, description = "Rule definition"),
    responses(
        (status = 201, description = "Rule created", body = Object),
        (status = 400, description = "Validation failure", body = ErrorResponse)
    )
)]
pub(crate) async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<RuleRow>)> {
    let body: RuleRequest = from_body(body)?;
    let new_rule = body.validate().map_err(validation_failed)?;
    let row = state.rules.create(&new_rule).await.map_err(internal_error)?;
    publish_rule_change(&state, RuleChangeReason::Create, row.rule_id).await;
    Ok((StatusCode::CREATED, Json(row)))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct RuleListParams {
    pub enabled: Option<bool>,
}

#[utoipa::path(
    get,
    path = "/api/v1/rules",
    tag = "Rules",
    params(RuleListParams),
    responses((status = 200, description = "All rules", body = Object))
)]
pub(crate) async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RuleListParams>,
) -> ApiResult<Json<Vec<RuleRow>>> {
    let rows = state
        .rules
        .list(params.enabled)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

#[utoipa::path(
    get,
    path = "/api/v1/rules/{id}",
    tag = "Rules",
    params(("id" = Uuid, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule", body = Object),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub(crate) async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RuleRow>> {
    state
        .rules
        .get(id)
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("rule not found: {}", id)))
}

#[utoipa::path(
    put,
    path = "/api/v1/rules/{id}",
    tag = "Rules",
    params(("id" = Uuid, Path, description = "Rule id")),
    request_body(content = Object, description = "Full rule definition"),
    responses(
        (status = 200, description = "Rule replaced", body = Object),
        (status = 400, description = "Validation failure", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub(crate) async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<RuleRow>> {
    let body: RuleRequest = from_body(body)?;
    let new_rule = body.validate().map_err(validation_failed)?;
    let row = state
        .rules
        .update(id, &new_rule)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("rule not found: {}", id)))?;
    publish_rule_change(&state, RuleChangeReason::Update, id).await;
    Ok(Json(row))
}

#[utoipa::path(
    patch,
    path = "/api/v1/rules/{id}",
    tag = "Rules",
    params(("id" = Uuid, Path, description = "Rule id")),
    request_body(content = Object, description = "Partial rule fields (at least one)"),
    responses(
        (status = 200, description = "Rule patched", body = Object),
        (status = 400, description = "Validation failure", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub(crate) async fn patch_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<RuleRow>> {
    let body: RulePatchRequest = from_body(body)?;
    let patch = body.validate().map_err(validation_failed)?;
    let row = state
        .rules
        .patch(id, &patch)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("rule not found: {}", id)))?;
    publish_rule_change(&state, RuleChangeReason::Patch, id).await;
    Ok(Json(row))
}

#[utoipa::path(
    delete,
    path = "/api/v1/rules/{id}",
    tag = "Rules",
    params(("id" = Uuid, Path, description = "Rule id")),
    responses(
        (status = 204, description = "Rule deleted"),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub(crate) async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let deleted = state.rules.delete(id).await.map_err(internal_error)?;
    if !deleted {
        return Err(not_found(format!("rule not found: {}", id)));
    }
    publish_rule_change(&state, RuleChangeReason::Delete, id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_json(value: serde_json::Value) -> RuleRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn create_request_applies_defaults() {
        let request = request_json(serde_json::json!({
            "name": "hi-err",
            "severity": "critical",
            "window_seconds": 60,
            "condition": {
                "type": "threshold",
                "metric": "count",
                "filters": {"event_type": "error", "source": "payment_service"},
                "operator": ">",
                "value": 5
            }
        }));
        let new_rule = request.validate().unwrap();
        assert!(new_rule.enabled);
        assert_eq!(new_rule.cooldown_seconds, 0);
    }

    #[test]
    fn zero_window_is_rejected() {
        let request = request_json(serde_json::json!({
            "name": "bad",
            "severity": "info",
            "window_seconds": 0,
            "condition": {"type": "threshold", "metric": "count", "operator": "<", "value": 1}
        }));
        let err = request.validate().unwrap_err();
        assert!(err.issues.iter().any(|i| i.contains("window_seconds")));
    }

    #[test]
    fn unknown_operator_fails_to_deserialize() {
        let result: Result<RuleRequest, _> = serde_json::from_value(serde_json::json!({
            "name": "bad-op",
            "severity": "info",
            "window_seconds": 60,
            "condition": {"type": "threshold", "metric": "count", "operator": "~=", "value": 1}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn empty_patch_is_rejected() {
        let err = RulePatchRequest::default().validate().unwrap_err();
        assert!(err.issues.iter().any(|i| i.contains("at least one field")));
    }

    #[test]
    fn patch_with_one_field_is_valid() {
        let patch = RulePatchRequest {
            enabled: Some(false),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(patch.enabled, Some(false));
    }
}
