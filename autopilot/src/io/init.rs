//! Initialization helpers for `.autopilot/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::config::{AgentConfig, write_config};

/// All canonical paths within `.autopilot/` for a workspace root.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    pub root: PathBuf,
    pub agent_dir: PathBuf,
    pub config_path: PathBuf,
    pub plan_path: PathBuf,
    pub scratchpad_path: PathBuf,
    pub knowledge_base_path: PathBuf,
    pub base_prompt_path: PathBuf,
    pub transcripts_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

impl AgentPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let agent_dir = root.join(".autopilot");
        Self {
            root: root.clone(),
            agent_dir: agent_dir.clone(),
            config_path: agent_dir.join("config.toml"),
            plan_path: agent_dir.join("main-plan.md"),
            scratchpad_path: agent_dir.join("scratchpad.md"),
            knowledge_base_path: agent_dir.join("knowledge_base.md"),
            base_prompt_path: agent_dir.join("base_prompt.md"),
            transcripts_dir: agent_dir.join("transcripts"),
            gitignore_path: agent_dir.join(".gitignore"),
        }
    }

    pub fn transcript_path(&self, run_id: &str) -> PathBuf {
        self.transcripts_dir.join(format!("{run_id}.json"))
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing agent-owned files.
    pub force: bool,
}

/// Create `.autopilot/` with a default config and empty documents.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<AgentPaths> {
    let paths = AgentPaths::new(root);
    debug!(root = %root.display(), force = options.force, "initializing workspace");
    fs::create_dir_all(&paths.transcripts_dir)
        .with_context(|| format!("create {}", paths.transcripts_dir.display()))?;

    if options.force || !paths.config_path.exists() {
        write_config(&paths.config_path, &AgentConfig::default())?;
    }
    write_if_missing_or_force(&paths.plan_path, "", options.force)?;
    write_if_missing_or_force(&paths.scratchpad_path, "", options.force)?;
    write_if_missing_or_force(
        &paths.knowledge_base_path,
        "# Knowledge Base\n\n",
        options.force,
    )?;
    write_if_missing_or_force(&paths.gitignore_path, "transcripts/\n", options.force)?;
    Ok(paths)
}

fn write_if_missing_or_force(path: &Path, contents: &str, force: bool) -> Result<()> {
    if !force && path.exists() {
        return Ok(());
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
