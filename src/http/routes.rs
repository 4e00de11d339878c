//! Admin HTTP routes.
//!
//! These handlers stand in for the admin screens and messaging endpoints.
//! They carry no business logic; they exist so the admission layer can be
//! exercised end to end with the same envelope the real endpoints return.

use axum::extract::{Query, RawQuery};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ratelimit::diff_flag;

/// Standard response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckNewMessagesParams {
    #[serde(rename = "lastChecked")]
    pub last_checked: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckNewMessagesResult {
    pub diff: bool,
    #[serde(rename = "lastChecked", skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub customer_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub customer_id: String,
    pub status: String,
    #[serde(default)]
    pub version: Option<i64>,
}

/// Build the admin router.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/check-new-messages", get(check_new_messages))
        .route("/admin/send-message", post(send_message))
        .route("/admin/update-status", post(update_status))
}

async fn health() -> ApiResponse<&'static str> {
    ApiResponse::success("ok")
}

async fn check_new_messages(
    Query(params): Query<CheckNewMessagesParams>,
    RawQuery(query): RawQuery,
) -> ApiResponse<CheckNewMessagesResult> {
    // Same reading of the flag as the limiter, so both agree on the mode.
    let diff = query.as_deref().is_some_and(diff_flag);
    debug!(diff = diff, last_checked = ?params.last_checked, "Checking for new messages");

    ApiResponse::success(CheckNewMessagesResult {
        diff,
        last_checked: params.last_checked,
    })
}

async fn send_message(Json(request): Json<SendMessageRequest>) -> Response {
    if request.message.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, ApiResponse::error("Message must not be empty"))
            .into_response();
    }
    debug!(customer_id = %request.customer_id, "Accepted outbound message");
    ApiResponse::success("Message sent successfully").into_response()
}

async fn update_status(Json(request): Json<UpdateStatusRequest>) -> Response {
    debug!(
        customer_id = %request.customer_id,
        status = %request.status,
        version = ?request.version,
        "Accepted status update"
    );
    ApiResponse::success("Status updated successfully").into_response()
}
