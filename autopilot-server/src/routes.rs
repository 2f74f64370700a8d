//! HTTP route handlers for the control API.

use std::sync::Arc;

use autopilot::controller::ControlError;
use autopilot::core::transcript::TurnRecord;
use autopilot::core::types::Decision;
use autopilot::io::gemini::list_models;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::{AppState, ChangeEvent};

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: String,
}

fn error(code: StatusCode, message: impl Into<String>) -> ApiError {
    (
        code,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn ok(status: &str) -> Json<StatusBody> {
    Json(StatusBody {
        status: status.to_string(),
    })
}

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/execute_plan", post(execute_plan))
        .route("/stop_agent", post(stop_agent))
        .route("/status", get(status))
        .route("/respond_to_confirmation", post(respond_to_confirmation))
        .route("/toggle_auto_approve", post(toggle_auto_approve))
        .route("/update_state", post(update_state))
        .route("/transcript", get(transcript))
        .route("/models", get(models))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecutePlanRequest {
    pub goal: Option<String>,
    pub model: Option<String>,
    pub auto_approve: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct Started {
    pub status: String,
    pub run_id: String,
}

/// POST /api/execute_plan - start a run.
async fn execute_plan(
    State(state): State<AppState>,
    Json(request): Json<ExecutePlanRequest>,
) -> Result<(StatusCode, Json<Started>), ApiError> {
    let goal = request.goal.unwrap_or_default();
    if goal.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "Goal is required."));
    }
    let started = state
        .controller
        .start(&goal, request.model.as_deref(), request.auto_approve)
        .map_err(|err| error(StatusCode::BAD_REQUEST, err.to_string()))?;
    info!(run_id = %started.run_id, "run started via api");
    state.notify(ChangeEvent::StatusChanged);
    Ok((
        StatusCode::ACCEPTED,
        Json(Started {
            status: "Agent started.".to_string(),
            run_id: started.run_id,
        }),
    ))
}

/// POST /api/stop_agent - stop the run, waiting for the loop to finish.
async fn stop_agent(State(state): State<AppState>) -> Result<Json<StatusBody>, ApiError> {
    let controller = Arc::clone(&state.controller);
    let outcome = tokio::task::spawn_blocking(move || controller.stop())
        .await
        .map_err(|err| error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
        .map_err(|err| error(StatusCode::BAD_REQUEST, err.to_string()))?;
    if !outcome.joined {
        warn!("stop returned before the loop thread finished");
    }
    state.notify(ChangeEvent::StatusChanged);
    Ok(ok("Agent stopped."))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub main_plan: String,
    pub scratchpad: String,
    pub agent_running: bool,
    pub agent_status: String,
    pub confirmation_prompt: Option<String>,
    pub confirmation_id: Option<u64>,
    pub auto_approve: bool,
    pub last_tool_output: String,
    pub run_id: Option<String>,
    pub iteration: u32,
}

/// GET /api/status - run snapshot plus the current documents.
async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let documents = state
        .controller
        .read_documents()
        .map_err(|err| error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))?;
    let run = state.controller.status();
    Ok(Json(StatusResponse {
        main_plan: documents.plan,
        scratchpad: documents.scratchpad,
        agent_running: run.status.is_live(),
        agent_status: run.status.as_str().to_string(),
        confirmation_prompt: run.confirmation_prompt,
        confirmation_id: run.confirmation_id,
        auto_approve: run.auto_approve,
        last_tool_output: run.last_tool_output,
        run_id: run.run_id,
        iteration: run.iteration,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationRequest {
    pub response: String,
    /// When set, only this confirmation is answered.
    #[serde(default)]
    pub confirmation_id: Option<u64>,
}

/// POST /api/respond_to_confirmation - approve or deny the pending call.
async fn respond_to_confirmation(
    State(state): State<AppState>,
    Json(request): Json<ConfirmationRequest>,
) -> Result<Json<StatusBody>, ApiError> {
    let decision: Decision = request
        .response
        .parse()
        .map_err(|_| error(StatusCode::BAD_REQUEST, "Invalid response."))?;
    let answered = match request.confirmation_id {
        Some(id) => state.controller.respond_to_request(id, decision),
        None => state.controller.respond_to_confirmation(decision),
    };
    answered.map_err(|err| match err {
        ControlError::NotRunning | ControlError::NoPendingConfirmation => {
            error(StatusCode::BAD_REQUEST, err.to_string())
        }
        other => error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    })?;
    state.notify(ChangeEvent::StatusChanged);
    Ok(ok("Response received."))
}

#[derive(Debug, Serialize)]
pub struct AutoApprove {
    pub auto_approve: bool,
}

/// POST /api/toggle_auto_approve - flip auto-approve for this and future runs.
async fn toggle_auto_approve(State(state): State<AppState>) -> Json<AutoApprove> {
    let auto_approve = state.controller.toggle_auto_approve();
    state.notify(ChangeEvent::StatusChanged);
    Json(AutoApprove { auto_approve })
}

#[derive(Debug, Deserialize)]
pub struct UpdateStateRequest {
    #[serde(default)]
    pub main_plan: String,
    #[serde(default)]
    pub scratchpad: String,
}

/// POST /api/update_state - replace plan and scratchpad.
async fn update_state(
    State(state): State<AppState>,
    Json(request): Json<UpdateStateRequest>,
) -> Result<Json<StatusBody>, ApiError> {
    state
        .controller
        .update_plan_and_scratchpad(&request.main_plan, &request.scratchpad)
        .map_err(|err| error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))?;
    state.notify(ChangeEvent::DocumentsChanged);
    Ok(ok("State updated."))
}

/// GET /api/transcript - current run transcript in the persisted shape.
async fn transcript(State(state): State<AppState>) -> Json<Vec<TurnRecord>> {
    Json(state.controller.status().transcript.to_records())
}

#[derive(Debug, Serialize)]
pub struct Models {
    pub models: Vec<String>,
}

/// GET /api/models - models that support content generation.
async fn models(State(state): State<AppState>) -> Result<Json<Models>, ApiError> {
    let config = state.gemini.clone();
    let models = tokio::task::spawn_blocking(move || list_models(&config))
        .await
        .map_err(|err| error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
        .map_err(|err| error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))?;
    Ok(Json(Models { models }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use autopilot::core::types::{Part, RunStatus};
    use autopilot::test_support::{RecordingTool, ScriptedModel, TestWorkspace, call, wait_until};
    use autopilot::tools::ToolRegistry;
    use serde_json::json;

    fn app(ws: &TestWorkspace, model: &ScriptedModel) -> AppState {
        let registry = ToolRegistry::builder()
            .register(
                RecordingTool::new("write_file", &["filepath"], "ok").requiring_confirmation(),
            )
            .build()
            .expect("registry");
        let controller = ws.controller(registry, model).expect("controller");
        AppState::new(controller, ws.paths.clone(), Default::default())
    }

    fn write_call() -> Vec<Part> {
        vec![call("w1", "write_file", json!({"filepath": "greet.py"}))]
    }

    #[tokio::test]
    async fn execute_plan_requires_a_goal() {
        let ws = TestWorkspace::new().expect("workspace");
        let state = app(&ws, &ScriptedModel::default());
        let err = execute_plan(State(state), Json(ExecutePlanRequest::default()))
            .await
            .expect_err("missing goal");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(err.1.error, "Goal is required.");
    }

    #[tokio::test]
    async fn run_is_controlled_through_the_api() {
        let ws = TestWorkspace::new().expect("workspace");
        let model = ScriptedModel::replies(vec![write_call()]);
        let state = app(&ws, &model);

        let request = || ExecutePlanRequest {
            goal: Some("add a greeting function".to_string()),
            ..Default::default()
        };
        let (code, started) = execute_plan(State(state.clone()), Json(request()))
            .await
            .expect("start");
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(started.status, "Agent started.");

        let again = execute_plan(State(state.clone()), Json(request()))
            .await
            .expect_err("second start");
        assert_eq!(again.1.error, "Agent is already running.");

        assert!(wait_until(Duration::from_secs(10), || {
            state.controller.status().status == RunStatus::AwaitingConfirmation
        }));
        let snapshot = status(State(state.clone())).await.expect("status");
        assert!(snapshot.agent_running);
        assert_eq!(snapshot.agent_status, "awaiting_confirmation");
        assert!(
            snapshot
                .confirmation_prompt
                .as_deref()
                .is_some_and(|p| p.contains("write_file"))
        );

        let invalid = respond_to_confirmation(
            State(state.clone()),
            Json(ConfirmationRequest {
                response: "maybe".to_string(),
                confirmation_id: None,
            }),
        )
        .await
        .expect_err("invalid");
        assert_eq!(invalid.1.error, "Invalid response.");

        let id = snapshot.confirmation_id.expect("confirmation id");
        let stale = respond_to_confirmation(
            State(state.clone()),
            Json(ConfirmationRequest {
                response: "deny".to_string(),
                confirmation_id: Some(id + 1),
            }),
        )
        .await
        .expect_err("stale id");
        assert_eq!(stale.1.error, "No confirmation is pending.");

        respond_to_confirmation(
            State(state.clone()),
            Json(ConfirmationRequest {
                response: "deny".to_string(),
                confirmation_id: Some(id),
            }),
        )
        .await
        .expect("deny");

        let stopped = stop_agent(State(state.clone())).await.expect("stop");
        assert_eq!(stopped.status, "Agent stopped.");
        let snapshot = status(State(state.clone())).await.expect("status");
        assert!(!snapshot.agent_running);
        assert_eq!(snapshot.agent_status, "stopped");

        let not_running = stop_agent(State(state.clone()))
            .await
            .expect_err("not running");
        assert_eq!(not_running.0, StatusCode::BAD_REQUEST);

        let records = transcript(State(state)).await;
        assert!(records.len() >= 3);
    }

    #[tokio::test]
    async fn documents_and_auto_approve_are_editable() {
        let ws = TestWorkspace::new().expect("workspace");
        let state = app(&ws, &ScriptedModel::default());

        update_state(
            State(state.clone()),
            Json(UpdateStateRequest {
                main_plan: "1. test".to_string(),
                scratchpad: "note".to_string(),
            }),
        )
        .await
        .expect("update");
        let snapshot = status(State(state.clone())).await.expect("status");
        assert_eq!(snapshot.main_plan, "1. test");
        assert_eq!(snapshot.scratchpad, "note");
        assert_eq!(snapshot.agent_status, "idle");

        assert!(toggle_auto_approve(State(state.clone())).await.auto_approve);
        assert!(!toggle_auto_approve(State(state)).await.auto_approve);
    }
}
