//! Plan and scratchpad documents shared between the loop and humans.
//!
//! Both live as plain markdown files. Every read-modify-write happens under
//! one lock and every write is an atomic replace, so the loop always observes
//! the latest edit made through [`DocumentStore`] and never a torn file.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::gate::lock;
use crate::io::atomic::{read_or_empty, write_atomic};
use crate::io::init::AgentPaths;

/// Current contents of both documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Documents {
    pub plan: String,
    pub scratchpad: String,
}

#[derive(Debug)]
pub struct DocumentStore {
    plan_path: PathBuf,
    scratchpad_path: PathBuf,
    guard: Mutex<()>,
}

impl DocumentStore {
    pub fn new(plan_path: impl Into<PathBuf>, scratchpad_path: impl Into<PathBuf>) -> Self {
        Self {
            plan_path: plan_path.into(),
            scratchpad_path: scratchpad_path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn from_paths(paths: &AgentPaths) -> Self {
        Self::new(&paths.plan_path, &paths.scratchpad_path)
    }

    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }

    pub fn scratchpad_path(&self) -> &Path {
        &self.scratchpad_path
    }

    pub fn read(&self) -> Result<Documents> {
        let _guard = lock(&self.guard);
        Ok(Documents {
            plan: read_or_empty(&self.plan_path)?,
            scratchpad: read_or_empty(&self.scratchpad_path)?,
        })
    }

    /// Replace both documents (human edit).
    pub fn replace(&self, plan: &str, scratchpad: &str) -> Result<()> {
        let _guard = lock(&self.guard);
        write_atomic(&self.plan_path, plan)?;
        write_atomic(&self.scratchpad_path, scratchpad)?;
        debug!(
            plan_bytes = plan.len(),
            scratchpad_bytes = scratchpad.len(),
            "documents replaced"
        );
        Ok(())
    }

    /// Append a note on its own line to the scratchpad.
    pub fn append_scratchpad(&self, note: &str) -> Result<()> {
        let _guard = lock(&self.guard);
        let mut scratchpad = read_or_empty(&self.scratchpad_path)?;
        if !scratchpad.is_empty() && !scratchpad.ends_with('\n') {
            scratchpad.push('\n');
        }
        scratchpad.push_str(note.trim_end());
        scratchpad.push('\n');
        write_atomic(&self.scratchpad_path, &scratchpad)
    }

    /// Re-initialize both documents for a fresh goal.
    pub fn reset_for_goal(&self, goal: &str) -> Result<()> {
        self.replace(
            &format!("The initial goal is to: {}\n", goal.trim()),
            "I need to break down the goal into a series of testable steps.\n",
        )
    }

    /// Make sure both files exist so watchers and editors can open them.
    pub fn ensure_exists(&self) -> Result<()> {
        let _guard = lock(&self.guard);
        for path in [&self.plan_path, &self.scratchpad_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            OpenOptions::new().create(true).append(true).open(path)?;
        }
        Ok(())
    }
}
