//! Model abstraction used by the orchestration loop.
//!
//! The loop only sees [`Model`]; the concrete backend (Gemini over HTTP, or a
//! scripted model in tests) is chosen by a [`ModelFactory`] at run start.

use anyhow::Result;

use crate::core::transcript::Transcript;
use crate::core::types::{Part, ToolCall};
use crate::tools::ToolDescriptor;

/// Everything the model sees for one turn.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub transcript: Transcript,
    /// Turn prompt (goal, plan, scratchpad, last output) appended as the final user turn.
    pub prompt: String,
    pub tools: Vec<ToolDescriptor>,
}

/// A model reply: ordered text and tool-call parts. Empty when the model
/// produced nothing usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub parts: Vec<Part>,
}

impl ModelReply {
    pub fn new(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|part| match part {
            Part::Text(text) => text.trim().is_empty(),
            Part::ToolCall(_) | Part::ToolResult(_) => false,
        })
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.parts.iter().filter_map(|part| match part {
            Part::ToolCall(call) => Some(call),
            Part::Text(_) | Part::ToolResult(_) => None,
        })
    }

    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text(text) = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

/// A language model that proposes the next action.
pub trait Model: Send {
    fn name(&self) -> &str;

    fn generate(&mut self, request: &ModelRequest) -> Result<ModelReply>;
}

/// Builds a model for a run. Called on the loop thread.
pub trait ModelFactory: Send + Sync {
    fn create(&self, model: &str) -> Result<Box<dyn Model>>;
}

impl<F> ModelFactory for F
where
    F: Fn(&str) -> Result<Box<dyn Model>> + Send + Sync,
{
    fn create(&self, model: &str) -> Result<Box<dyn Model>> {
        self(model)
    }
}
