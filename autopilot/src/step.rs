//! One turn of the orchestration loop.
//!
//! A turn reads the documents, renders the prompt, calls the model once and
//! then dispatches every requested tool call in emitted order, pausing at the
//! confirmation gate where required.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::run_state::RunState;
use crate::core::types::{Decision, Part, Role, RunStatus, ToolCall, ToolResult, Turn};
use crate::io::documents::Documents;
use crate::io::model::{Model, ModelRequest};
use crate::io::prompt::TurnInputs;
use crate::looping::{RunEnvironment, RunShared};
use crate::tools::{COMPLETION_TOOL, DispatchOutcome};

pub const EMPTY_RESPONSE: &str = "Error: Model generated an empty response.";
pub const TEXT_INSTEAD_OF_CALL: &str = "Model generated text instead of a tool call. Continuing.";
pub const FORCED_DENIAL: &str =
    "User denied the action (run stopped before confirmation). Please reconsider the plan.";
pub const SKIPPED_AFTER_STOP: &str = "Skipped: run stopped before this call was dispatched.";

/// What the loop should do after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Start the next turn.
    Continue,
    /// The model produced nothing usable; wait, then redo the turn.
    Retry(Duration),
    /// The completion tool ran.
    Complete,
    /// A stop arrived while the model was thinking; its reply was dropped.
    Stopped,
}

/// Run one turn. `correction` carries the self-correction prompt between
/// turns; it is consumed only once the model has replied with usable output.
#[instrument(skip_all, fields(iteration = shared.read(|s| s.iteration)))]
pub fn run_turn(
    shared: &RunShared,
    env: &RunEnvironment,
    model: &mut dyn Model,
    correction: &mut Option<String>,
) -> TurnOutcome {
    let documents = env.documents.read().unwrap_or_else(|err| {
        warn!(err = %format!("{err:#}"), "failed to read plan and scratchpad");
        Documents::default()
    });
    let (goal, last_tool_output, transcript, iteration) = shared.read(|s| {
        (
            s.goal.clone(),
            s.last_tool_output.clone(),
            s.transcript.clone(),
            s.iteration,
        )
    });

    let prompt = match env.prompts.render_turn(&TurnInputs {
        goal: &goal,
        plan: &documents.plan,
        scratchpad: &documents.scratchpad,
        last_tool_output: &last_tool_output,
        correction: correction.as_deref(),
    }) {
        Ok(prompt) => prompt,
        Err(err) => {
            let message = format!("Error: failed to render turn prompt: {err:#}");
            warn!(%message);
            shared.update(|s| s.last_tool_output = message);
            return TurnOutcome::Retry(env.settings.error_backoff);
        }
    };

    let request = ModelRequest {
        transcript,
        prompt,
        tools: env.registry.descriptors(),
    };
    let reply = model.generate(&request);

    if shared.stop.is_requested() {
        debug!("stop requested during model call; discarding reply");
        return TurnOutcome::Stopped;
    }

    let reply = match reply {
        Ok(reply) => reply,
        Err(err) => {
            let message = format!("Error: model request failed: {err:#}");
            warn!(%message);
            shared.update(|s| s.last_tool_output = message);
            return TurnOutcome::Retry(env.settings.error_backoff);
        }
    };
    if reply.is_empty() {
        warn!("model returned an empty response");
        shared.update(|s| s.last_tool_output = EMPTY_RESPONSE.to_string());
        return TurnOutcome::Retry(env.settings.empty_response_backoff);
    }
    *correction = None;

    let parts = assign_call_ids(reply.parts, iteration);
    let model_turn = Turn::new(Role::Model, parts);
    let calls: Vec<ToolCall> = model_turn.tool_calls().cloned().collect();
    let narration = model_turn.text();
    shared.update(|s| push(s, model_turn));

    if calls.is_empty() {
        note(env, &narration);
        shared.update(|s| {
            s.last_tool_output = TEXT_INSTEAD_OF_CALL.to_string();
            s.iteration += 1;
        });
        return TurnOutcome::Continue;
    }

    let mut corrections = Vec::new();
    let mut completed = false;
    for call in calls {
        if shared.stop.is_requested() {
            record(shared, &call, SKIPPED_AFTER_STOP.to_string());
            continue;
        }
        note(
            env,
            &format!(
                "Executing tool: {} with args: {}",
                call.name,
                Value::Object(call.arguments.clone())
            ),
        );

        let mut approved = false;
        if env.registry.requires_confirmation(&call.name) && !shared.auto_approve() {
            match confirm(shared, &call) {
                Decision::Approve => approved = true,
                Decision::Deny => continue,
            }
        }

        let dispatch = env.registry.dispatch(&call);
        debug!(tool = %call.name, outcome = ?dispatch.outcome, "tool dispatched");
        if let Some(prompt) = env.correction.correct(&call.name, &dispatch.output) {
            corrections.push(prompt);
        }
        if call.name == COMPLETION_TOOL && dispatch.outcome == DispatchOutcome::Completed {
            completed = true;
        }
        let shown = if approved {
            format!("{}\n\n{}", Decision::Approve.feedback(), dispatch.output)
        } else {
            dispatch.output.clone()
        };
        record(shared, &call, dispatch.output);
        shared.update(|s| s.last_tool_output = shown);
    }

    if !corrections.is_empty() {
        *correction = Some(corrections.join("\n"));
    }
    shared.update(|s| {
        s.iteration += 1;
        if completed {
            s.completed = true;
        }
    });
    if completed {
        TurnOutcome::Complete
    } else {
        TurnOutcome::Continue
    }
}

/// Suspend on the gate. Records the decision as a user turn; a denial also
/// answers the call so the transcript stays complete.
fn confirm(shared: &RunShared, call: &ToolCall) -> Decision {
    let prompt = format!(
        "The agent wants to run '{}' with arguments: {}. Approve?",
        call.name,
        Value::Object(call.arguments.clone())
    );
    let resolution = shared.gate.request_with(&prompt, |id| {
        shared.update(|s| {
            s.status = RunStatus::AwaitingConfirmation;
            s.confirmation_prompt = Some(prompt.clone());
            s.confirmation_id = Some(id);
        });
        info!(tool = %call.name, confirmation_id = id, "awaiting confirmation");
    });

    let feedback = if resolution.forced {
        FORCED_DENIAL
    } else {
        resolution.decision.feedback()
    };
    info!(
        tool = %call.name,
        decision = ?resolution.decision,
        forced = resolution.forced,
        "confirmation resolved"
    );
    shared.update(|s| {
        s.status = RunStatus::Running;
        s.confirmation_prompt = None;
        s.confirmation_id = None;
        push(s, Turn::user_text(feedback));
    });
    if resolution.decision == Decision::Deny {
        record(shared, call, feedback.to_string());
        shared.update(|s| s.last_tool_output = feedback.to_string());
    }
    resolution.decision
}

fn record(shared: &RunShared, call: &ToolCall, output: String) {
    let result = ToolResult {
        call_id: call.call_id.clone(),
        name: call.name.clone(),
        output,
    };
    shared.update(|s| push(s, Turn::tool_result(result)));
}

fn push(state: &mut RunState, turn: Turn) {
    if let Err(err) = state.transcript.push(turn) {
        warn!(%err, "dropping inconsistent transcript turn");
    }
}

fn note(env: &RunEnvironment, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if let Err(err) = env.documents.append_scratchpad(text) {
        warn!(err = %format!("{err:#}"), "failed to append to scratchpad");
    }
}

/// Give every tool call an id; models may omit them.
fn assign_call_ids(mut parts: Vec<Part>, iteration: u32) -> Vec<Part> {
    let mut n = 0;
    for part in &mut parts {
        if let Part::ToolCall(call) = part {
            if call.call_id.is_empty() {
                call.call_id = format!("call-{iteration}-{n}");
            }
            n += 1;
        }
    }
    parts
}
