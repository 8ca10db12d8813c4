//! ==============================================================================
//! server.rs - web server
//! ==============================================================================
//!
//! routes:
//!     POST   /api/webhook/:webhook_id         chorecast payloads (webhook.rs)
//!     GET    /api/states                      registered sensor states
//!     GET    /api/entries                     configured entries
//!     POST   /api/config/flow                 setup step
//!     GET    /api/entries/:entry_id/options   options form
//!     POST   /api/entries/:entry_id/options   submit options -> reload
//!     DELETE /api/entries/:entry_id           unload and remove
//!
//! ==============================================================================

use crate::domain::{EntryData, EntryOptions, SensorState};
use crate::flow::{ConfigFlow, FlowInput, FlowResult, OptionsFlow};
use crate::hub::{EntrySummary, Hub, HubError};
use crate::webhook::webhook_handler;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use tower_http::cors::CorsLayer;

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match self {
            HubError::UnknownEntry(_) => StatusCode::NOT_FOUND,
            HubError::AlreadyLoaded(_) | HubError::WebhookInUse { .. } | HubError::SingleInstance => {
                StatusCode::CONFLICT
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/api/webhook/:webhook_id", post(webhook_handler))
        .route("/api/states", get(states_handler))
        .route("/api/entries", get(entries_handler))
        .route("/api/config/flow", post(config_flow_handler))
        .route(
            "/api/entries/:entry_id/options",
            get(options_form_handler).post(options_submit_handler),
        )
        .route("/api/entries/:entry_id", delete(remove_entry_handler))
        .layer(CorsLayer::permissive())
        .with_state(hub)
}

pub async fn run_server(
    bind: &str,
    hub: Hub,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(hub);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    tracing::info!("[STARTUP] ✓ Webhook server live at http://{}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("web server error")?;
    Ok(())
}

/// json api endpoint for the display layer
async fn states_handler(State(hub): State<Hub>) -> Json<Vec<SensorState>> {
    Json(hub.sink().snapshot())
}

async fn entries_handler(State(hub): State<Hub>) -> Json<Vec<EntrySummary>> {
    Json(hub.entries().await)
}

/// setup step; an empty body asks for the form
///
/// the entry count only shapes the reply; the hub makes the final
/// single-instance call when the entry is created.
async fn config_flow_handler(
    State(hub): State<Hub>,
    input: Option<Json<FlowInput>>,
) -> Result<Json<FlowResult>, HubError> {
    let result = ConfigFlow::step_user(hub.entry_count().await, input.map(|Json(i)| i));
    if let FlowResult::CreateEntry { title, data } = &result {
        match hub
            .create_entry(title, EntryData { webhook_id: data.webhook_id.clone() })
            .await
        {
            Ok(entry) => tracing::info!(entry_id = %entry.entry_id, "chorecast entry created"),
            Err(HubError::SingleInstance) => return Ok(Json(ConfigFlow::already_configured())),
            Err(e) => return Err(e),
        }
    }
    Ok(Json(result))
}

async fn options_form_handler(
    State(hub): State<Hub>,
    Path(entry_id): Path<String>,
) -> Result<Json<FlowResult>, HubError> {
    let entry = hub
        .entry(&entry_id)
        .await
        .ok_or_else(|| HubError::UnknownEntry(entry_id.clone()))?;
    Ok(Json(OptionsFlow::step_init(&entry, None)))
}

async fn options_submit_handler(
    State(hub): State<Hub>,
    Path(entry_id): Path<String>,
    Json(input): Json<FlowInput>,
) -> Result<Json<FlowResult>, HubError> {
    let entry = hub
        .entry(&entry_id)
        .await
        .ok_or_else(|| HubError::UnknownEntry(entry_id.clone()))?;
    let result = OptionsFlow::step_init(&entry, Some(input));
    if let FlowResult::CreateEntry { data, .. } = &result {
        hub.update_options(
            &entry_id,
            EntryOptions { webhook_id: Some(data.webhook_id.clone()) },
        )
        .await?;
    }
    Ok(Json(result))
}

async fn remove_entry_handler(
    State(hub): State<Hub>,
    Path(entry_id): Path<String>,
) -> Result<StatusCode, HubError> {
    hub.remove_entry(&entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConfigEntry, DEFAULT_WEBHOOK_ID};
    use crate::states::MemoryStates;
    use std::sync::Arc;

    fn hub() -> Hub {
        Hub::new(Arc::new(MemoryStates::new()), false)
    }

    #[tokio::test]
    async fn test_config_flow_creates_single_entry() {
        let hub = hub();
        let Json(form) = config_flow_handler(State(hub.clone()), None).await.unwrap();
        assert!(matches!(form, FlowResult::Form { .. }));

        let input = FlowInput { webhook_id: DEFAULT_WEBHOOK_ID.to_string() };
        let Json(created) = config_flow_handler(State(hub.clone()), Some(Json(input.clone())))
            .await
            .unwrap();
        assert!(matches!(created, FlowResult::CreateEntry { .. }));
        assert_eq!(hub.entry_count().await, 1);
        assert!(hub.instance_for_webhook(DEFAULT_WEBHOOK_ID).await.is_some());

        let Json(again) = config_flow_handler(State(hub.clone()), Some(Json(input))).await.unwrap();
        assert_eq!(again, FlowResult::Abort { reason: "single_instance_allowed".to_string() });
    }

    #[tokio::test]
    async fn test_concurrent_setup_submissions_create_one_entry() {
        let hub = hub();
        let input = || Some(Json(FlowInput { webhook_id: DEFAULT_WEBHOOK_ID.to_string() }));

        let (first, second) = tokio::join!(
            config_flow_handler(State(hub.clone()), input()),
            config_flow_handler(State(hub.clone()), input())
        );
        let results = [first.unwrap().0, second.unwrap().0];
        let created = results
            .iter()
            .filter(|r| matches!(r, FlowResult::CreateEntry { .. }))
            .count();
        assert_eq!(created, 1);
        assert!(results.contains(&FlowResult::Abort { reason: "single_instance_allowed".to_string() }));
        assert_eq!(hub.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_options_submit_rebinds_webhook() {
        let hub = hub();
        hub.add_entry(ConfigEntry {
            entry_id: "e1".to_string(),
            title: "Chorecast".to_string(),
            data: EntryData { webhook_id: DEFAULT_WEBHOOK_ID.to_string() },
            options: EntryOptions::default(),
        })
        .await
        .unwrap();

        let Json(result) = options_submit_handler(
            State(hub.clone()),
            Path("e1".to_string()),
            Json(FlowInput { webhook_id: "evening_summary".to_string() }),
        )
        .await
        .unwrap();
        assert!(matches!(result, FlowResult::CreateEntry { .. }));
        assert!(hub.instance_for_webhook("evening_summary").await.is_some());
        assert!(hub.instance_for_webhook(DEFAULT_WEBHOOK_ID).await.is_none());

        let Json(form) = options_form_handler(State(hub.clone()), Path("e1".to_string()))
            .await
            .unwrap();
        match form {
            FlowResult::Form { fields, .. } => assert_eq!(fields[0].default, "evening_summary"),
            other => panic!("expected form, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_entry_is_not_found() {
        let response = remove_entry_handler(State(hub()), Path("missing".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_states_lists_registered_sensors() {
        let hub = hub();
        let Json(created) = config_flow_handler(
            State(hub.clone()),
            Some(Json(FlowInput { webhook_id: "x".to_string() })),
        )
        .await
        .unwrap();
        assert!(matches!(created, FlowResult::CreateEntry { .. }));

        let Json(states) = states_handler(State(hub)).await;
        assert_eq!(states.len(), 5);
        assert!(states.iter().all(|s| s.device.model == "Webhook"));
    }
}
