//! Self-correction policy: turns a failed tool result into a corrective prompt.
//!
//! The loop never aborts on a tool failure. Instead the policy's output is
//! appended to the next turn's prompt so the model can inspect, fix and retry.

/// Decides whether a tool output warrants a corrective follow-up.
///
/// Any `Fn(&str, &str) -> Option<String>` is a policy, so detection strategies
/// can be swapped without touching the loop.
pub trait CorrectionPolicy: Send + Sync {
    fn correct(&self, tool_name: &str, output: &str) -> Option<String>;
}

impl<F> CorrectionPolicy for F
where
    F: Fn(&str, &str) -> Option<String> + Send + Sync,
{
    fn correct(&self, tool_name: &str, output: &str) -> Option<String> {
        self(tool_name, output)
    }
}

/// Flags any output containing a marker (case-insensitive).
#[derive(Debug, Clone)]
pub struct ErrorMarkerPolicy {
    marker: String,
}

impl ErrorMarkerPolicy {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_lowercase(),
        }
    }
}

impl Default for ErrorMarkerPolicy {
    fn default() -> Self {
        Self::new("error")
    }
}

impl CorrectionPolicy for ErrorMarkerPolicy {
    fn correct(&self, _tool_name: &str, output: &str) -> Option<String> {
        if output.to_lowercase().contains(&self.marker) {
            Some(corrective_prompt(output))
        } else {
            None
        }
    }
}

/// Never asks for correction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrection;

impl CorrectionPolicy for NoCorrection {
    fn correct(&self, _tool_name: &str, _output: &str) -> Option<String> {
        None
    }
}

pub fn corrective_prompt(output: &str) -> String {
    format!(
        "The previous action failed with: {}. Inspect relevant state, propose a fix, \
         apply it, then retry.",
        output.trim()
    )
}
