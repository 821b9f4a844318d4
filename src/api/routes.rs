//! REST handlers under `/api`.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use serde_json::Value;

use super::AppState;
use super::models::{
    ApiError, ConfigUpdateResponse, DEFAULT_EVENTS_LIMIT, EventsParams, EventsResponse,
    ModeResponse, ModeUpdate, RootResponse, SuccessResponse,
};
use crate::config::RuntimeConfig;
use crate::controller::{DeviceKind, StateSnapshot};
use crate::observability::event_log::{EventQuery, EventStats};
use crate::sequence::{Mode, TriggerOutcome};

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn root(State(state): State<Arc<AppState>>) -> Json<RootResponse> {
    Json(RootResponse {
        name: "Scare Box API",
        version: env!("CARGO_PKG_VERSION"),
        status: if state.controller.is_running() {
            "running"
        } else {
            "stopped"
        },
    })
}

// ============================================================================
// Configuration
// ============================================================================

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<RuntimeConfig> {
    Json(state.controller.config())
}

pub async fn update_config(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<ConfigUpdateResponse> {
    let Json(body) = body?;
    let Value::Object(patch) = body else {
        return Err(ApiError::BadRequest("expected a JSON object".to_string()));
    };

    let update = state.controller.update_config(patch).await?;
    if update.applied.is_empty() && !update.rejected.is_empty() {
        let fields = update
            .rejected
            .iter()
            .map(|r| format!("{}: {}", r.field, r.reason))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ApiError::BadRequest(format!("Invalid configuration ({fields})")));
    }
    Ok(Json(update.into()))
}

pub async fn get_mode(State(state): State<Arc<AppState>>) -> Json<ModeResponse> {
    Json(ModeResponse {
        mode: state.controller.mode(),
    })
}

pub async fn set_mode(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ModeUpdate>, JsonRejection>,
) -> ApiResult<SuccessResponse> {
    let Json(body) = body?;
    let mode: Mode = body.mode.parse().map_err(ApiError::BadRequest)?;
    state.controller.set_mode(mode).await?;
    Ok(Json(SuccessResponse::ok(format!("Mode set to {mode}"))))
}

// ============================================================================
// Control
// ============================================================================

pub async fn trigger(State(state): State<Arc<AppState>>) -> ApiResult<SuccessResponse> {
    match state.controller.manual_trigger().await? {
        TriggerOutcome::Started => Ok(Json(SuccessResponse::ok("Scare sequence triggered"))),
        TriggerOutcome::Rejected => Err(ApiError::Rejected(
            "Cannot trigger in current state".to_string(),
        )),
    }
}

pub async fn start(State(state): State<Arc<AppState>>) -> ApiResult<SuccessResponse> {
    let message = if state.controller.start().await? {
        "System started"
    } else {
        "System already running"
    };
    Ok(Json(SuccessResponse::ok(message)))
}

pub async fn stop(State(state): State<Arc<AppState>>) -> ApiResult<SuccessResponse> {
    let message = if state.controller.stop().await? {
        "System stopped"
    } else {
        "System already stopped"
    };
    Ok(Json(SuccessResponse::ok(message)))
}

pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateSnapshot> {
    Json(state.controller.state())
}

// ============================================================================
// Devices
// ============================================================================

pub async fn devices(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.controller.devices_status().await)
}

pub async fn microphone(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.controller.device_status(DeviceKind::Microphone).await)
}

pub async fn lights(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.controller.device_status(DeviceKind::Lights).await)
}

pub async fn speaker(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.controller.device_status(DeviceKind::Speaker).await)
}

// ============================================================================
// Events
// ============================================================================

pub async fn events(
    State(state): State<Arc<AppState>>,
    params: Result<Query<EventsParams>, QueryRejection>,
) -> ApiResult<EventsResponse> {
    let Query(params) = params?;
    let events = state.controller.events().query(&EventQuery {
        limit: Some(params.limit.unwrap_or(DEFAULT_EVENTS_LIMIT)),
        level: params.level,
        category: params.category,
    });
    Ok(Json(EventsResponse {
        total: events.len(),
        events,
    }))
}

pub async fn event_stats(State(state): State<Arc<AppState>>) -> Json<EventStats> {
    Json(state.controller.events().stats())
}
