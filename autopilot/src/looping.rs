//! The orchestration loop and the state it shares with the controller.
//!
//! One loop thread per run owns all writes to [`RunState`]. The controller
//! and HTTP handlers only read snapshots, answer the [`ConfirmationGate`] and
//! raise the [`StopSignal`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::correction::{CorrectionPolicy, ErrorMarkerPolicy};
use crate::core::run_state::RunState;
use crate::core::types::{RunStatus, Turn};
use crate::gate::{ConfirmationGate, StopSignal};
use crate::io::config::AgentConfig;
use crate::io::documents::DocumentStore;
use crate::io::init::AgentPaths;
use crate::io::model::Model;
use crate::io::prompt::{PromptEngine, opening_turn_text};
use crate::io::retrieval::{ContextSource, LexicalIndex, NoContext, context_or_empty};
use crate::io::transcript_log::write_transcript;
use crate::step::{TurnOutcome, run_turn};
use crate::tools::{ToolRegistry, default_registry};

/// State shared between the loop thread and everyone else for one run.
#[derive(Debug)]
pub struct RunShared {
    state: RwLock<RunState>,
    pub stop: StopSignal,
    pub gate: ConfirmationGate,
    auto_approve: AtomicBool,
}

impl RunShared {
    pub fn new(initial: RunState) -> Self {
        let auto_approve = initial.auto_approve;
        Self {
            state: RwLock::new(initial),
            stop: StopSignal::new(),
            gate: ConfirmationGate::new(),
            auto_approve: AtomicBool::new(auto_approve),
        }
    }

    /// Consistent copy of the run state. Reports `Stopping` once a stop was
    /// requested and the loop has not yet finished.
    pub fn snapshot(&self) -> RunState {
        let mut snapshot = self.read(RunState::clone);
        snapshot.auto_approve = self.auto_approve();
        if self.stop.is_requested() && snapshot.status != RunStatus::Stopped {
            snapshot.status = RunStatus::Stopping;
        }
        snapshot
    }

    pub fn status(&self) -> RunStatus {
        self.snapshot().status
    }

    pub fn auto_approve(&self) -> bool {
        self.auto_approve.load(Ordering::SeqCst)
    }

    /// Takes effect at the next confirmation-requiring call.
    pub fn set_auto_approve(&self, enabled: bool) {
        self.auto_approve.store(enabled, Ordering::SeqCst);
    }

    /// Ask the loop to stop and release a pending confirmation.
    pub fn request_stop(&self) {
        self.stop.request();
        self.gate.force_release();
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&RunState) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Loop thread only.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Delays applied between retried turns.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub empty_response_backoff: Duration,
    pub error_backoff: Duration,
}

impl LoopSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            empty_response_backoff: config.empty_response_backoff(),
            error_backoff: config.error_backoff(),
        }
    }
}

/// Collaborators the loop needs. Shared (read-only) across runs.
pub struct RunEnvironment {
    pub paths: AgentPaths,
    pub registry: ToolRegistry,
    pub documents: DocumentStore,
    pub prompts: PromptEngine,
    pub correction: Box<dyn CorrectionPolicy>,
    pub context: Box<dyn ContextSource>,
    pub settings: LoopSettings,
}

impl RunEnvironment {
    /// Built-in tools, error-marker correction and lexical retrieval for a
    /// workspace.
    pub fn for_workspace(paths: AgentPaths, config: &AgentConfig) -> Result<Self> {
        let registry = default_registry(&paths, config).context("build tool registry")?;
        let documents = DocumentStore::from_paths(&paths);
        documents.ensure_exists()?;
        let context: Box<dyn ContextSource> = if config.retrieval.enabled {
            Box::new(LexicalIndex::new(
                &paths.root,
                &config.retrieval,
                &config.workspace.protected_paths,
            ))
        } else {
            Box::new(NoContext)
        };
        Ok(Self {
            registry,
            documents,
            prompts: PromptEngine::new()?,
            correction: Box::new(ErrorMarkerPolicy::default()),
            context,
            settings: LoopSettings::from_config(config),
            paths,
        })
    }
}

/// Drive one run to `Stopped`.
///
/// Returns only after a stop request or the completion tool. Everything else
/// (model errors, tool failures, persistence failures) is recorded and fed
/// into the next turn.
pub fn run_loop(shared: &RunShared, env: &RunEnvironment, model: &mut dyn Model) {
    let (run_id, goal) = shared.read(|s| (s.run_id.clone().unwrap_or_default(), s.goal.clone()));
    info!(%run_id, model = model.name(), "run started");

    begin(shared, env, &goal);

    let mut correction: Option<String> = None;
    loop {
        if shared.stop.is_requested() {
            debug!("stop observed at top of iteration");
            break;
        }
        let outcome = run_turn(shared, env, model, &mut correction);
        persist(shared, env, &run_id);
        match outcome {
            TurnOutcome::Continue => {}
            TurnOutcome::Retry(backoff) => {
                debug!(backoff_ms = backoff.as_millis() as u64, "retrying turn");
                if shared.stop.sleep(backoff) {
                    break;
                }
            }
            TurnOutcome::Complete => {
                info!(%run_id, "completion tool invoked");
                break;
            }
            TurnOutcome::Stopped => break,
        }
    }

    finish(shared, env, &run_id);
}

/// `Idle -> Running`: reset documents and seed the transcript.
fn begin(shared: &RunShared, env: &RunEnvironment, goal: &str) {
    if let Err(err) = env.documents.reset_for_goal(goal) {
        warn!(err = %format!("{err:#}"), "failed to reset plan and scratchpad");
    }
    let system_prompt = match env.prompts.system_prompt_for(&env.paths) {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "failed to render system prompt; using bundled text");
            env.prompts.render_system(None, "").unwrap_or_default()
        }
    };
    let context = context_or_empty(env.context.as_ref(), goal);
    let opening = Turn::user_text(opening_turn_text(&context, &system_prompt, goal));
    shared.update(|s| {
        s.transcript = Default::default();
        if let Err(err) = s.transcript.push(opening) {
            warn!(%err, "failed to seed transcript");
        }
        s.status = RunStatus::Running;
    });
}

/// `* -> Stopped`.
///
/// The transcript is written before the status flips, so a reader that sees
/// `Stopped` also sees the final file.
pub(crate) fn finish(shared: &RunShared, env: &RunEnvironment, run_id: &str) {
    persist(shared, env, run_id);
    shared.update(|s| {
        s.status = RunStatus::Stopped;
        s.confirmation_prompt = None;
        s.confirmation_id = None;
    });
    info!(%run_id, "run stopped");
}

fn persist(shared: &RunShared, env: &RunEnvironment, run_id: &str) {
    if run_id.is_empty() {
        return;
    }
    let transcript = shared.read(|s| s.transcript.clone());
    if let Err(err) = write_transcript(&env.paths.transcript_path(run_id), &transcript) {
        warn!(err = %format!("{err:#}"), "failed to persist transcript");
    }
}
