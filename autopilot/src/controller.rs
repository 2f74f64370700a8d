//! Run controller: the control surface over the single permitted run.
//!
//! `start` spawns the loop on a dedicated thread and returns immediately.
//! `stop` raises the stop signal, force-releases a pending confirmation and
//! waits a bounded time for the thread to finish. `status` never blocks on
//! the loop: it clones the latest state under a short read lock.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::run_state::RunState;
use crate::core::types::{Decision, RunStatus};
use crate::gate::{GateError, lock};
use crate::io::config::AgentConfig;
use crate::io::documents::{DocumentStore, Documents};
use crate::io::model::ModelFactory;
use crate::looping::{RunEnvironment, RunShared, finish, run_loop};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("Agent is already running.")]
    AlreadyRunning,
    #[error("Agent is not running.")]
    NotRunning,
    #[error("No confirmation is pending.")]
    NoPendingConfirmation,
    #[error("failed to spawn loop thread: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub run_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// False when the loop thread did not finish within the join timeout.
    pub joined: bool,
}

struct ActiveRun {
    run_id: String,
    shared: Arc<RunShared>,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl ActiveRun {
    /// A run whose loop has reached `Stopped` only has its exit left, so it
    /// no longer blocks a new start.
    fn is_live(&self) -> bool {
        !self.handle.is_finished() && self.shared.read(|s| s.status) != RunStatus::Stopped
    }
}

pub struct RunController {
    env: Arc<RunEnvironment>,
    factory: Arc<dyn ModelFactory>,
    default_model: String,
    join_timeout: Duration,
    auto_approve_default: AtomicBool,
    lifecycle: Mutex<Option<ActiveRun>>,
    current: RwLock<Option<Arc<RunShared>>>,
}

impl RunController {
    pub fn new(
        env: RunEnvironment,
        factory: Arc<dyn ModelFactory>,
        default_model: &str,
        auto_approve_default: bool,
        join_timeout: Duration,
    ) -> Self {
        Self {
            env: Arc::new(env),
            factory,
            default_model: default_model.to_string(),
            join_timeout,
            auto_approve_default: AtomicBool::new(auto_approve_default),
            lifecycle: Mutex::new(None),
            current: RwLock::new(None),
        }
    }

    /// Defaults (model, auto-approve, join timeout) taken from the config.
    pub fn with_config(
        env: RunEnvironment,
        factory: Arc<dyn ModelFactory>,
        config: &AgentConfig,
    ) -> Self {
        Self::new(
            env,
            factory,
            &config.model,
            config.auto_approve,
            config.stop_join_timeout(),
        )
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.env.documents
    }

    pub fn environment(&self) -> &RunEnvironment {
        &self.env
    }

    /// Start a run. `model` and `auto_approve` fall back to the controller
    /// defaults when `None`.
    pub fn start(
        &self,
        goal: &str,
        model: Option<&str>,
        auto_approve: Option<bool>,
    ) -> Result<StartOutcome, ControlError> {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.as_ref().is_some_and(ActiveRun::is_live) {
            return Err(ControlError::AlreadyRunning);
        }
        if let Some(previous) = lifecycle.take() {
            reap(previous);
        }

        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model)
            .to_string();
        let auto_approve =
            auto_approve.unwrap_or_else(|| self.auto_approve_default.load(Ordering::SeqCst));
        let run_id = self.next_run_id();

        let mut initial = RunState::new(&run_id, goal.trim(), &model, auto_approve);
        initial.status = RunStatus::Running;
        let shared = Arc::new(RunShared::new(initial));

        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = {
            let shared = Arc::clone(&shared);
            let env = Arc::clone(&self.env);
            let factory = Arc::clone(&self.factory);
            let run_id = run_id.clone();
            thread::Builder::new()
                .name("autopilot-loop".to_string())
                .spawn(move || {
                    // Dropped on exit (normal or unwinding); `stop` waits on it.
                    let _done = done_tx;
                    worker(&shared, &env, factory.as_ref(), &model, &run_id);
                })
                .map_err(|err| ControlError::Spawn(err.to_string()))?
        };

        info!(%run_id, "run spawned");
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&shared));
        *lifecycle = Some(ActiveRun {
            run_id: run_id.clone(),
            shared,
            handle,
            done: done_rx,
        });
        Ok(StartOutcome { run_id })
    }

    /// Stop the live run, waiting up to the join timeout.
    pub fn stop(&self) -> Result<StopOutcome, ControlError> {
        let mut lifecycle = lock(&self.lifecycle);
        if !lifecycle.as_ref().is_some_and(ActiveRun::is_live) {
            return Err(ControlError::NotRunning);
        }
        let Some(run) = lifecycle.take() else {
            return Err(ControlError::NotRunning);
        };

        info!(run_id = %run.run_id, "stop requested");
        run.shared.request_stop();
        match run.done.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                reap(run);
                Ok(StopOutcome { joined: true })
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    run_id = %run.run_id,
                    timeout_secs = self.join_timeout.as_secs_f64(),
                    "loop thread did not join within timeout; detaching"
                );
                // Keep the handle so a new start is refused until it exits.
                *lifecycle = Some(run);
                Ok(StopOutcome { joined: false })
            }
        }
    }

    /// Snapshot of the current (or last) run. Idle before the first start.
    pub fn status(&self) -> RunState {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|shared| shared.snapshot())
            .unwrap_or_else(|| RunState {
                auto_approve: self.auto_approve_default.load(Ordering::SeqCst),
                ..RunState::default()
            })
    }

    pub fn is_running(&self) -> bool {
        self.status().status.is_live()
    }

    pub fn respond_to_confirmation(&self, decision: Decision) -> Result<(), ControlError> {
        let shared = self.live_shared().ok_or(ControlError::NotRunning)?;
        shared
            .gate
            .resolve(decision)
            .map_err(|GateError::NoPendingRequest| ControlError::NoPendingConfirmation)
    }

    /// Answer the confirmation whose [`RunState::confirmation_id`] is `id`.
    /// Fails with `NoPendingConfirmation` once the loop has moved past it.
    pub fn respond_to_request(&self, id: u64, decision: Decision) -> Result<(), ControlError> {
        let shared = self.live_shared().ok_or(ControlError::NotRunning)?;
        shared
            .gate
            .resolve_request(id, decision)
            .map_err(|GateError::NoPendingRequest| ControlError::NoPendingConfirmation)
    }

    /// Human edit of both documents. Visible to the loop at its next turn.
    pub fn update_plan_and_scratchpad(&self, plan: &str, scratchpad: &str) -> Result<()> {
        self.env.documents.replace(plan, scratchpad)
    }

    pub fn read_documents(&self) -> Result<Documents> {
        self.env.documents.read()
    }

    /// Set auto-approve for future runs and the live one.
    pub fn set_auto_approve(&self, enabled: bool) {
        self.auto_approve_default.store(enabled, Ordering::SeqCst);
        if let Some(shared) = self.live_shared() {
            shared.set_auto_approve(enabled);
        }
        info!(enabled, "auto-approve updated");
    }

    pub fn toggle_auto_approve(&self) -> bool {
        let enabled = !self.status().auto_approve;
        self.set_auto_approve(enabled);
        enabled
    }

    fn live_shared(&self) -> Option<Arc<RunShared>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|shared| shared.read(|s| s.status) != RunStatus::Stopped)
            .cloned()
    }

    fn next_run_id(&self) -> String {
        let base = format!("run-{}", Utc::now().format("%Y%m%dT%H%M%SZ"));
        let previous = self.status().run_id;
        let taken = |candidate: &str| {
            previous.as_deref() == Some(candidate)
                || self.env.paths.transcript_path(candidate).exists()
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while taken(&candidate) {
            candidate = format!("{base}-{n}");
            n += 1;
        }
        candidate
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        if let Some(run) = lock(&self.lifecycle).as_ref() {
            run.shared.request_stop();
        }
    }
}

fn worker(
    shared: &RunShared,
    env: &RunEnvironment,
    factory: &dyn ModelFactory,
    model_name: &str,
    run_id: &str,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match factory.create(model_name) {
        Ok(mut model) => run_loop(shared, env, model.as_mut()),
        Err(err) => {
            let message = format!("Error: could not create model '{model_name}': {err:#}");
            warn!(%message);
            shared.update(|s| s.last_tool_output = message);
            finish(shared, env, run_id);
        }
    }));
    if outcome.is_err() {
        warn!(%run_id, "loop thread panicked; marking run stopped");
        shared.update(|s| {
            s.last_tool_output = "Error: the agent loop crashed.".to_string();
        });
        finish(shared, env, run_id);
    }
}

fn reap(run: ActiveRun) {
    if run.handle.join().is_err() {
        warn!(run_id = %run.run_id, "loop thread panicked");
    }
}
