//! Shared deterministic types for the agent core.
//!
//! These types define the stable contracts between the loop, the tool layer and
//! the model transport. They carry no I/O and are cheap to clone into snapshots.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Textual outcome of a dispatched tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Id of the `ToolCall` this result answers.
    pub call_id: String,
    pub name: String,
    pub output: String,
}

/// Tagged payload inside a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Part::ToolCall(ToolCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        })
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Part::ToolResult(ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            output: output.into(),
        })
    }
}

/// One role-tagged unit of transcript content.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self::new(Role::Tool, vec![Part::ToolResult(result)])
    }

    /// Concatenated text parts, in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.parts.iter().filter_map(|part| match part {
            Part::ToolCall(call) => Some(call),
            _ => None,
        })
    }
}

/// Lifecycle of the single permitted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    AwaitingConfirmation,
    Stopping,
    Stopped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::AwaitingConfirmation => "awaiting_confirmation",
            RunStatus::Stopping => "stopping",
            RunStatus::Stopped => "stopped",
        }
    }

    /// Whether a loop thread may still be executing.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            RunStatus::Running | RunStatus::AwaitingConfirmation | RunStatus::Stopping
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human answer to a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    /// Text fed back to the model once the decision is known.
    pub fn feedback(self) -> &'static str {
        match self {
            Decision::Approve => "User approved the action.",
            Decision::Deny => "User denied the action. Please reconsider the plan.",
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" | "y" | "yes" => Ok(Decision::Approve),
            "deny" | "denied" | "n" | "no" => Ok(Decision::Deny),
            other => Err(format!("expected 'approve' or 'deny', got '{other}'")),
        }
    }
}
