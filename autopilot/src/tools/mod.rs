//! Tool registry and dispatcher.
//!
//! The registry is built once and is immutable afterwards, so the loop thread
//! can share it without locking. [`ToolRegistry::dispatch`] is the failure
//! boundary: unknown names, schema violations, `Err` returns and panics all
//! come back as text the model (and the correction policy) can read.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use anyhow::Result;
use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::types::ToolCall;

pub mod finish;
pub mod fs;
pub mod guard;
pub mod knowledge;
pub mod sandbox;
pub mod search;

mod defaults;

pub use defaults::default_registry;

/// Name of the tool that ends a run.
pub const COMPLETION_TOOL: &str = "finish_task";

/// Static description of a tool as declared to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the argument mapping.
    pub parameters: Value,
    pub requires_confirmation: bool,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            requires_confirmation: false,
        }
    }

    pub fn confirmed(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }
}

/// Build an object schema whose properties are all required strings.
pub fn string_params(params: &[(&str, &str)]) -> Value {
    let mut properties = Map::new();
    for (name, description) in params {
        properties.insert(
            (*name).to_string(),
            json!({"type": "string", "description": description}),
        );
    }
    let required: Vec<&str> = params.iter().map(|(name, _)| *name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// A named capability the model may invoke.
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Run the tool. Policy rejections (e.g. permission denied) are `Ok`
    /// text; `Err` is reserved for failures.
    fn invoke(&self, args: &Map<String, Value>) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("tool name must not be empty")]
    EmptyName,
    #[error("duplicate tool name '{0}'")]
    DuplicateName(String),
    #[error("invalid parameter schema for tool '{name}': {message}")]
    InvalidSchema { name: String, message: String },
}

/// How a dispatch ended. The text output is always available regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Failed,
    UnknownTool,
    InvalidArguments,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub output: String,
    pub outcome: DispatchOutcome,
}

struct Entry {
    tool: Box<dyn Tool>,
    validator: Validator,
}

pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    output_limit_bytes: usize,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("output_limit_bytes", &self.output_limit_bytes)
            .finish()
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn resolve(&self, name: &str) -> Option<&dyn Tool> {
        self.index
            .get(name)
            .map(|&i| self.entries[i].tool.as_ref())
    }

    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.resolve(name)
            .is_some_and(|tool| tool.descriptor().requires_confirmation)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.tool.descriptor().name.as_str())
            .collect()
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.entries
            .iter()
            .map(|entry| entry.tool.descriptor().clone())
            .collect()
    }

    /// Resolve, validate and invoke a call. Never panics and never returns
    /// an error; every failure is folded into the textual output.
    pub fn dispatch(&self, call: &ToolCall) -> Dispatch {
        let Some(&i) = self.index.get(&call.name) else {
            debug!(tool = %call.name, "unknown tool requested");
            return Dispatch {
                output: format!("Tool '{}' not found.", call.name),
                outcome: DispatchOutcome::UnknownTool,
            };
        };
        let entry = &self.entries[i];

        let instance = Value::Object(call.arguments.clone());
        let violations: Vec<String> = entry
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            debug!(tool = %call.name, violations = violations.len(), "invalid tool arguments");
            return Dispatch {
                output: format!(
                    "Error: invalid arguments for tool '{}': {}",
                    call.name,
                    violations.join("; ")
                ),
                outcome: DispatchOutcome::InvalidArguments,
            };
        }

        let invoked = catch_unwind(AssertUnwindSafe(|| entry.tool.invoke(&call.arguments)));
        let (output, outcome) = match invoked {
            Ok(Ok(output)) => (output, DispatchOutcome::Completed),
            Ok(Err(err)) => {
                warn!(tool = %call.name, err = %format!("{err:#}"), "tool failed");
                (
                    format!("Error executing tool {}: {err:#}", call.name),
                    DispatchOutcome::Failed,
                )
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(tool = %call.name, %message, "tool panicked");
                (
                    format!("Error executing tool {}: tool panicked: {message}", call.name),
                    DispatchOutcome::Failed,
                )
            }
        };
        Dispatch {
            output: truncate_output(output, self.output_limit_bytes),
            outcome,
        }
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<Box<dyn Tool>>,
    output_limit_bytes: Option<usize>,
}

impl ToolRegistryBuilder {
    pub fn register(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Box::new(tool));
        self
    }

    pub fn output_limit_bytes(mut self, limit: usize) -> Self {
        self.output_limit_bytes = Some(limit);
        self
    }

    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        let mut entries = Vec::with_capacity(self.tools.len());
        let mut index = HashMap::new();
        for tool in self.tools {
            let descriptor = tool.descriptor();
            let name = descriptor.name.clone();
            if name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if index.contains_key(&name) {
                return Err(RegistryError::DuplicateName(name));
            }
            let validator = jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&descriptor.parameters)
                .map_err(|err| RegistryError::InvalidSchema {
                    name: name.clone(),
                    message: err.to_string(),
                })?;
            index.insert(name, entries.len());
            entries.push(Entry { tool, validator });
        }
        Ok(ToolRegistry {
            entries,
            index,
            output_limit_bytes: self.output_limit_bytes.unwrap_or(100_000),
        })
    }
}

/// Cut `output` to at most `limit` bytes on a char boundary, noting how much
/// was dropped.
pub fn truncate_output(mut output: String, limit: usize) -> String {
    if output.len() <= limit {
        return output;
    }
    let mut cut = limit;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = output.len() - cut;
    output.truncate(cut);
    output.push_str(&format!("\n[truncated {dropped} bytes]"));
    output
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fetch a required string argument. Schema validation runs first, so a
/// miss here means the schema and the tool disagree.
pub(crate) fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing string argument '{name}'"))
}
