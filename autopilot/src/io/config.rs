//! Agent configuration stored under `.autopilot/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::atomic::write_atomic;

/// Agent configuration (TOML).
///
/// Edited by humans; every field has a default so partial files stay valid.
/// Secrets are never stored here, only the names of the env vars holding them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier used when a run does not name one.
    pub model: String,

    /// Skip confirmation prompts for new runs.
    pub auto_approve: bool,

    pub temperature: f32,

    /// Delay before retrying a turn whose model reply was empty.
    pub empty_response_backoff_ms: u64,

    /// Delay before retrying a turn whose model call failed.
    pub error_backoff_ms: u64,

    /// How long `stop` waits for the loop thread to finish.
    pub stop_join_timeout_secs: u64,

    /// Truncate tool outputs beyond this many bytes.
    pub tool_output_limit_bytes: usize,

    pub workspace: WorkspaceConfig,
    pub sandbox: SandboxConfig,
    pub search: SearchConfig,
    pub gemini: GeminiConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace-relative paths that write/delete/rename tools must not touch.
    pub protected_paths: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            protected_paths: vec![".git".to_string(), ".autopilot".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Docker image used for code execution and tests.
    pub image: String,
    /// Dockerfile (workspace-relative) used by `autopilot build-sandbox`.
    pub dockerfile: String,
    pub timeout_secs: u64,
    /// Command run inside the sandbox by the `run_tests` tool.
    pub test_command: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "autopilot-sandbox".to_string(),
            dockerfile: "Dockerfile.sandbox".to_string(),
            timeout_secs: 120,
            test_command: vec![
                "python".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
                "-q".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub max_results: u32,
    pub api_key_env: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.tavily.com/search".to_string(),
            max_results: 5,
            api_key_env: "TAVILY_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key_env: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub enabled: bool,
    pub chunk_bytes: usize,
    pub max_results: usize,
    /// Directory names never indexed.
    pub skip_dirs: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_bytes: 1024,
            max_results: 5,
            skip_dirs: vec![
                ".git".to_string(),
                ".autopilot".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
            ],
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            auto_approve: false,
            temperature: 0.1,
            empty_response_backoff_ms: 5_000,
            error_backoff_ms: 10_000,
            stop_join_timeout_secs: 5,
            tool_output_limit_bytes: 100_000,
            workspace: WorkspaceConfig::default(),
            sandbox: SandboxConfig::default(),
            search: SearchConfig::default(),
            gemini: GeminiConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("temperature must be within 0.0..=2.0"));
        }
        if self.stop_join_timeout_secs == 0 {
            return Err(anyhow!("stop_join_timeout_secs must be > 0"));
        }
        if self.tool_output_limit_bytes == 0 {
            return Err(anyhow!("tool_output_limit_bytes must be > 0"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.test_command.is_empty() || self.sandbox.test_command[0].trim().is_empty()
        {
            return Err(anyhow!("sandbox.test_command must be a non-empty array"));
        }
        if self.retrieval.chunk_bytes == 0 {
            return Err(anyhow!("retrieval.chunk_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn empty_response_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_response_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_join_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
