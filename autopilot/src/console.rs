//! Terminal-side bookkeeping for answering confirmations.
//!
//! A single model turn can request several confirmations back to back, and
//! the loop may move from one to the next between two polls. Prompts are
//! therefore tracked by gate id, never by status transitions.

use crate::controller::{ControlError, RunController};
use crate::core::run_state::RunState;
use crate::core::types::Decision;

/// Which confirmation the terminal last showed and last answered.
#[derive(Debug, Default)]
pub struct PromptTracker {
    shown: Option<u64>,
    answered: Option<u64>,
}

impl PromptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prompt text to print, returned once per confirmation request.
    pub fn observe(&mut self, state: &RunState) -> Option<String> {
        let id = state.confirmation_id?;
        if self.shown == Some(id) {
            return None;
        }
        self.shown = Some(id);
        Some(
            state
                .confirmation_prompt
                .clone()
                .unwrap_or_else(|| "Approve?".to_string()),
        )
    }

    /// The shown confirmation still waiting for an answer, if any.
    pub fn awaiting(&self) -> Option<u64> {
        self.shown.filter(|id| self.answered != Some(*id))
    }

    /// Send `decision` for the shown confirmation. Returns `Ok(false)` when
    /// nothing shown is waiting, including when the request was already
    /// answered elsewhere or the run stopped.
    pub fn answer(
        &mut self,
        controller: &RunController,
        decision: Decision,
    ) -> Result<bool, ControlError> {
        let Some(id) = self.awaiting() else {
            return Ok(false);
        };
        self.answered = Some(id);
        match controller.respond_to_request(id, decision) {
            Ok(()) => Ok(true),
            Err(ControlError::NoPendingConfirmation | ControlError::NotRunning) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunStatus;

    fn waiting(id: u64, prompt: &str) -> RunState {
        RunState {
            status: RunStatus::AwaitingConfirmation,
            confirmation_prompt: Some(prompt.to_string()),
            confirmation_id: Some(id),
            ..RunState::default()
        }
    }

    #[test]
    fn each_request_is_shown_once() {
        let mut tracker = PromptTracker::new();
        assert_eq!(tracker.observe(&RunState::default()), None);
        assert_eq!(
            tracker.observe(&waiting(1, "write a.txt?")).as_deref(),
            Some("write a.txt?")
        );
        assert_eq!(tracker.observe(&waiting(1, "write a.txt?")), None);
        assert_eq!(tracker.awaiting(), Some(1));
    }

    #[test]
    fn back_to_back_requests_are_both_shown() {
        let mut tracker = PromptTracker::new();
        tracker.observe(&waiting(1, "write a.txt?"));
        tracker.answered = Some(1);
        assert_eq!(tracker.awaiting(), None);

        // The status never left AwaitingConfirmation between the two polls.
        assert_eq!(
            tracker.observe(&waiting(2, "write b.txt?")).as_deref(),
            Some("write b.txt?")
        );
        assert_eq!(tracker.awaiting(), Some(2));
    }
}
