// HTTP surface of the push channel: task scheduling and the cron dispatch trigger.

use crate::dispatch::worker::DispatchWorker;
use crate::queue::scheduling::{schedule_notifications, ScheduleError, ScheduleRequest};
use crate::queue::store::TaskStore;
use crate::session::config::WorkoutSettings;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct ServerState {
    store: Arc<dyn TaskStore>,
    worker: DispatchWorker,
    settings: WorkoutSettings,
    cron_secret: Option<String>,
}

impl ServerState {
    pub fn new(
        store: Arc<dyn TaskStore>,
        worker: DispatchWorker,
        settings: WorkoutSettings,
        cron_secret: Option<String>,
    ) -> Self {
        if cron_secret.is_none() {
            tracing::warn!("PHOTO_CHECK_CRON_SECRET is not set; dispatch trigger is unauthenticated");
        }
        Self {
            store,
            worker,
            settings,
            cron_secret,
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/schedule-notifications", post(schedule))
        .route("/api/send-notifications", get(send_notifications))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    tracing::info!("photo-check server listening on http://{local_addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

fn bearer_is_valid(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        return true;
    };
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let candidate = header_value
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();
    !expected_token.is_empty() && candidate == expected_token
}

async fn schedule(
    State(state): State<ServerState>,
    Json(body): Json<ScheduleRequest>,
) -> impl IntoResponse {
    let result = schedule_notifications(
        state.store.as_ref(),
        &body,
        &state.settings,
        Utc::now(),
        &mut rand::thread_rng(),
    );

    match result {
        Ok(tasks) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "Notifications scheduled.",
                "sendAt": tasks.iter().map(|t| t.send_at).collect::<Vec<_>>(),
            })),
        ),
        Err(e @ ScheduleError::MissingField(_)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"success": false, "error": e.to_string()})),
        ),
        Err(e) => {
            tracing::error!("Failed to schedule notifications: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"success": false, "error": e.to_string()})),
            )
        }
    }
}

async fn send_notifications(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !bearer_is_valid(&headers, &state.cron_secret) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    match state.worker.run_pass(Utc::now()).await {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "sent": report.sent,
                "failed": report.failed,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Dispatch pass failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
