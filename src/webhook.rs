//! ==============================================================================
//! webhook.rs - inbound chorecast webhook
//! ==============================================================================
//!
//! purpose:
//!     POST /api/webhook/{webhook_id}
//!
//!     parses the body, unwraps the optional `{"data": {...}}` envelope that
//!     chorecast's daily summary job sends, and delivers the resulting object
//!     to the instance bound to that webhook id.
//!
//! responses:
//!     200 "ok"               payload delivered
//!     400 "invalid json"     body is not json
//!     400 "invalid payload"  unwrapped body is not an object
//!     404 "unknown webhook"  no loaded entry uses this id
//!
//! ==============================================================================

use crate::domain::Payload;
use crate::hub::Hub;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum WebhookError {
    #[error("invalid json")]
    InvalidJson,
    #[error("invalid payload")]
    InvalidPayload,
    #[error("unknown webhook")]
    UnknownWebhook,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            WebhookError::InvalidJson | WebhookError::InvalidPayload => StatusCode::BAD_REQUEST,
            WebhookError::UnknownWebhook => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}

/// body -> payload object, with the `data` envelope removed
pub fn parse_body(body: &[u8]) -> Result<Payload, WebhookError> {
    let parsed: Value = serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("chorecast webhook: invalid json ({})", e);
        WebhookError::InvalidJson
    })?;

    let unwrapped = match parsed {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
        other => other,
    };

    match unwrapped {
        Value::Object(payload) => Ok(payload),
        other => {
            tracing::warn!("chorecast webhook: payload not an object: {}", other);
            Err(WebhookError::InvalidPayload)
        }
    }
}

pub async fn webhook_handler(
    State(hub): State<Hub>,
    Path(webhook_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    if hub.instance_for_webhook(&webhook_id).await.is_none() {
        tracing::debug!("webhook '{}' is not registered", webhook_id);
        return Err(WebhookError::UnknownWebhook);
    }

    let payload = parse_body(&body)?;
    // the entry may be unloaded between the check above and delivery
    let Some(delivery) = hub.deliver_to_webhook(&webhook_id, payload).await else {
        tracing::debug!("webhook '{}' was unregistered before delivery", webhook_id);
        return Err(WebhookError::UnknownWebhook);
    };
    let projection = &delivery.projection;
    tracing::debug!(
        webhook_id = %webhook_id,
        users = projection.users.len(),
        skipped = projection.skipped_users.len(),
        discovered = projection.discovered.len(),
        "payload applied"
    );
    Ok((StatusCode::OK, "ok"))
}
