//! The completion tool. Invoking it ends the run after the current iteration.

use anyhow::Result;
use serde_json::{Map, Value, json};

use super::{COMPLETION_TOOL, Tool, ToolDescriptor};

pub struct FinishTask {
    descriptor: ToolDescriptor,
}

impl FinishTask {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                COMPLETION_TOOL,
                "Signal that the goal is fully achieved and all tests pass.",
                json!({"type": "object", "properties": {}}),
            ),
        }
    }
}

impl Default for FinishTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for FinishTask {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, _args: &Map<String, Value>) -> Result<String> {
        Ok("Task marked as complete.".to_string())
    }
}
