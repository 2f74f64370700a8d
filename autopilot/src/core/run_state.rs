//! Snapshot-able description of the single permitted run.

use serde::Serialize;

use crate::core::transcript::Transcript;
use crate::core::types::RunStatus;

/// State of the current (or last) run.
///
/// Mutated only by the loop thread; everyone else receives clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    pub run_id: Option<String>,
    pub status: RunStatus,
    pub goal: String,
    pub model: String,
    pub auto_approve: bool,
    pub transcript: Transcript,
    pub confirmation_prompt: Option<String>,
    /// Gate id of the pending confirmation; set and cleared with the prompt.
    pub confirmation_id: Option<u64>,
    pub last_tool_output: String,
    /// Completed model turns.
    pub iteration: u32,
    /// Set once the completion tool has run.
    pub completed: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            run_id: None,
            status: RunStatus::Idle,
            goal: String::new(),
            model: String::new(),
            auto_approve: false,
            transcript: Transcript::new(),
            confirmation_prompt: None,
            confirmation_id: None,
            last_tool_output: String::new(),
            iteration: 0,
            completed: false,
        }
    }
}

impl RunState {
    pub fn new(run_id: &str, goal: &str, model: &str, auto_approve: bool) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
            goal: goal.to_string(),
            model: model.to_string(),
            auto_approve,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_idle_and_empty() {
        let state = RunState::default();
        assert_eq!(state.status, RunStatus::Idle);
        assert!(state.transcript.is_empty());
        assert_eq!(state.confirmation_prompt, None);
        assert_eq!(state.confirmation_id, None);
    }

    #[test]
    fn serializes_transcript_in_wire_shape() {
        let mut state = RunState::new("run-1", "goal", "gemini-1.5-flash", false);
        state
            .transcript
            .push(crate::core::types::Turn::user_text("hello"))
            .expect("push");
        let value = serde_json::to_value(&state).expect("serialize");
        assert_eq!(value["status"], "idle");
        assert_eq!(value["transcript"][0]["parts"][0]["text"], "hello");
    }
}
