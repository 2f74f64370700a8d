//! Prompt rendering for the orchestration loop.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::io::atomic::read_or_empty;
use crate::io::init::AgentPaths;

const ROLE_TEXT: &str = include_str!("prompts/role.md");
const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TURN_TEMPLATE: &str = include_str!("prompts/turn.md");

/// Inputs for one turn prompt.
#[derive(Debug, Clone, Default)]
pub struct TurnInputs<'a> {
    pub goal: &'a str,
    pub plan: &'a str,
    pub scratchpad: &'a str,
    pub last_tool_output: &'a str,
    pub correction: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .context("load system template")?;
        env.add_template("turn", TURN_TEMPLATE)
            .context("load turn template")?;
        Ok(Self { env })
    }

    /// System prompt: role text (bundled unless overridden), workflow and
    /// knowledge base.
    pub fn render_system(
        &self,
        role_override: Option<&str>,
        knowledge_base: &str,
    ) -> Result<String> {
        let role = role_override
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| ROLE_TEXT.trim());
        let template = self.env.get_template("system")?;
        let rendered = template.render(context! {
            role => role,
            knowledge_base => knowledge_base.trim(),
        })?;
        Ok(rendered)
    }

    pub fn render_turn(&self, input: &TurnInputs<'_>) -> Result<String> {
        let template = self.env.get_template("turn")?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            plan => input.plan.trim(),
            scratchpad => input.scratchpad.trim(),
            last_tool_output => input.last_tool_output.trim(),
            correction => input.correction.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    /// Read the optional role override and the knowledge base from disk and
    /// render the system prompt.
    pub fn system_prompt_for(&self, paths: &AgentPaths) -> Result<String> {
        let role = read_or_empty(&paths.base_prompt_path)?;
        let knowledge_base = read_or_empty(&paths.knowledge_base_path)?;
        debug!(
            role_override = !role.trim().is_empty(),
            knowledge_bytes = knowledge_base.len(),
            "rendering system prompt"
        );
        self.render_system(Some(&role), &knowledge_base)
    }
}

/// Text of the first transcript turn.
pub fn opening_turn_text(context: &str, system_prompt: &str, goal: &str) -> String {
    let body = format!("System Prompt: {system_prompt}\n\nUser Goal: {}", goal.trim());
    if context.trim().is_empty() {
        body
    } else {
        format!("{}\n\n{body}", context.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_prompt_contains_every_section() {
        let engine = PromptEngine::new().expect("engine");
        let rendered = engine
            .render_turn(&TurnInputs {
                goal: "add a greeting function",
                plan: "1. write test",
                scratchpad: "thinking",
                last_tool_output: "File written successfully.",
                correction: None,
            })
            .expect("render");
        assert!(rendered.contains("Goal:\nadd a greeting function"));
        assert!(rendered.contains("Main Plan:\n1. write test"));
        assert!(rendered.contains("Scratchpad:\nthinking"));
        assert!(rendered.contains("Last Tool Output:\nFile written successfully."));
        assert!(rendered.contains("exactly one next action"));
        assert!(!rendered.contains("Correction:"));
    }

    #[test]
    fn correction_is_rendered_when_present() {
        let engine = PromptEngine::new().expect("engine");
        let rendered = engine
            .render_turn(&TurnInputs {
                goal: "g",
                last_tool_output: "Error: file not found: a.py",
                correction: Some("The previous action failed with: Error: file not found: a.py."),
                ..TurnInputs::default()
            })
            .expect("render");
        assert!(
            rendered.contains("Correction:\nThe previous action failed with: Error: file not found")
        );
    }

    #[test]
    fn system_prompt_uses_override_and_knowledge_base() {
        let engine = PromptEngine::new().expect("engine");
        let bundled = engine.render_system(None, "- prefer pathlib").expect("render");
        assert!(bundled.contains("autonomous software engineer"));
        assert!(bundled.contains("<knowledge_base>\n- prefer pathlib\n</knowledge_base>"));
        assert!(bundled.contains("test-driven"));

        let custom = engine.render_system(Some("You are terse."), "").expect("render");
        assert!(custom.starts_with("You are terse."));
        assert!(!custom.contains("autonomous software engineer"));
    }

    #[test]
    fn opening_turn_prepends_context() {
        assert_eq!(
            opening_turn_text("", "sys", "goal"),
            "System Prompt: sys\n\nUser Goal: goal"
        );
        assert!(opening_turn_text("Relevant code snippets:\n...", "sys", "goal")
            .starts_with("Relevant code snippets:"));
    }
}
