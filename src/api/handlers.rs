use crate::tools::{execute_probe_run, ProbeError};
use crate::types::*;
use crate::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use std::sync::Arc;
use tracing::{error, info, warn};

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "chatprobe",
        "version": env!("CARGO_PKG_VERSION"),
        "run_active": state.run_active()
    }))
}

pub async fn list_scenarios(State(state): State<Arc<AppState>>) -> Json<ScenarioListResponse> {
    let scenarios = state
        .config
        .scenarios
        .iter()
        .map(|(name, prompts)| ScenarioInfo {
            name: name.clone(),
            prompt_count: prompts.len(),
        })
        .collect();
    Json(ScenarioListResponse { scenarios })
}

/// Runs to completion (or cancellation) before answering.
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunReport>, (StatusCode, Json<ErrorResponse>)> {
    match execute_probe_run(&state, request).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Probe run error: {}", e);
            } else {
                warn!("Probe run refused: {}", e);
            }
            Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

pub async fn cancel_run(State(state): State<Arc<AppState>>) -> Json<CancelResponse> {
    let cancelled = state.cancel_active_run();
    if cancelled {
        info!("Cancellation requested for the active run");
    }
    Json(CancelResponse { cancelled })
}

fn status_for(e: &ProbeError) -> StatusCode {
    match e {
        ProbeError::UnknownScenario(_) => StatusCode::NOT_FOUND,
        ProbeError::EmptyPrompts | ProbeError::InvalidChatUrl(_) => StatusCode::BAD_REQUEST,
        ProbeError::Busy => StatusCode::CONFLICT,
        ProbeError::RelayUnavailable(_) | ProbeError::BrowserUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ProbeError::Browser(_) => StatusCode::BAD_GATEWAY,
    }
}
