//! Request and response bodies for the HTTP API.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::ConfigUpdate;
use crate::error::ControllerError;
use crate::observability::event_log::{Event, EventCategory, EventLevel};
use crate::sequence::Mode;

/// Default page size for `GET /api/events`.
pub const DEFAULT_EVENTS_LIMIT: usize = 100;

/// Generic `{success, message}` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    /// Whether the action took effect.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl SuccessResponse {
    /// A successful reply.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Reply to `PUT /api/config`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigUpdateResponse {
    /// Always `true`; total refusal is an [`ApiError`].
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Field names that were applied.
    pub applied: Vec<&'static str>,
    /// Fields whose values were refused.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedFieldBody>,
    /// Field names that were ignored.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignored: Vec<String>,
}

/// A refused field in [`ConfigUpdateResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct RejectedFieldBody {
    /// Field name.
    pub field: &'static str,
    /// Why it was refused.
    pub reason: String,
}

impl From<ConfigUpdate> for ConfigUpdateResponse {
    fn from(update: ConfigUpdate) -> Self {
        let message = match (update.applied.is_empty(), update.persisted) {
            (true, _) => "No changes applied".to_string(),
            (false, true) => "Configuration updated".to_string(),
            (false, false) => "Configuration updated but could not be saved".to_string(),
        };
        Self {
            success: true,
            message,
            applied: update.applied.iter().map(|e| e.field.as_str()).collect(),
            rejected: update
                .rejected
                .into_iter()
                .map(|r| RejectedFieldBody {
                    field: r.field.as_str(),
                    reason: r.reason,
                })
                .collect(),
            ignored: update.unknown.into_iter().map(|u| u.name).collect(),
        }
    }
}

/// Body of `PUT /api/mode`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModeUpdate {
    /// `child` or `adult`.
    pub mode: String,
}

/// Reply to `GET /api/mode`.
#[derive(Debug, Clone, Serialize)]
pub struct ModeResponse {
    /// Current mode.
    pub mode: Mode,
}

/// Query string of `GET /api/events`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EventsParams {
    /// Most recent matching events to return.
    pub limit: Option<usize>,
    /// Severity filter.
    pub level: Option<EventLevel>,
    /// Category filter.
    pub category: Option<EventCategory>,
}

/// Reply to `GET /api/events`.
#[derive(Debug, Clone, Serialize)]
pub struct EventsResponse {
    /// Matching events, oldest first.
    pub events: Vec<Event>,
    /// Number of events returned.
    pub total: usize,
}

/// Reply to `GET /`.
#[derive(Debug, Clone, Serialize)]
pub struct RootResponse {
    /// Service name.
    pub name: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// `running` or `stopped`.
    pub status: &'static str,
}

// ============================================================================
// Errors
// ============================================================================

/// Failure at the HTTP boundary, always rendered as `{success:false, message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The action was declined in the current state.
    #[error("{0}")]
    Rejected(String),

    /// The request was malformed.
    #[error("{0}")]
    BadRequest(String),

    /// The controller is gone.
    #[error("controller unavailable")]
    Closed,

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Rejected(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Closed => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_) | Self::Closed) {
            tracing::error!(error = %self, "request failed");
        }
        let body = SuccessResponse {
            success: false,
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<ControllerError> for ApiError {
    fn from(error: ControllerError) -> Self {
        match error {
            ControllerError::Closed => Self::Closed,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
