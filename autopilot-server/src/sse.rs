//! Server-Sent Events stream, status poller and document watcher.

use std::convert::Infallible;
use std::path::Path;
use std::time::Duration;

use autopilot::core::run_state::RunState;
use autopilot::core::types::RunStatus;
use autopilot::io::init::AgentPaths;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize)]
struct SsePayload {
    #[serde(rename = "type")]
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
}

impl From<&ChangeEvent> for SsePayload {
    fn from(event: &ChangeEvent) -> Self {
        let bare = |event_type| SsePayload {
            event_type,
            run_id: None,
            prompt: None,
        };
        match event {
            ChangeEvent::StatusChanged => bare("status_changed"),
            ChangeEvent::DocumentsChanged => bare("documents_changed"),
            ChangeEvent::TranscriptUpdated { run_id } => SsePayload {
                run_id: run_id.clone(),
                ..bare("transcript_updated")
            },
            ChangeEvent::ConfirmationRequested { prompt } => SsePayload {
                prompt: Some(prompt.clone()),
                ..bare("confirmation_requested")
            },
        }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change_event) => {
                    let payload = SsePayload::from(&change_event);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("change").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// The parts of a run snapshot the poller compares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observed {
    pub run_id: Option<String>,
    pub status: Option<RunStatus>,
    pub auto_approve: bool,
    pub iteration: u32,
    pub last_tool_output: String,
    pub confirmation_prompt: Option<String>,
    pub confirmation_id: Option<u64>,
    pub transcript_len: usize,
}

impl From<&RunState> for Observed {
    fn from(state: &RunState) -> Self {
        Self {
            run_id: state.run_id.clone(),
            status: Some(state.status),
            auto_approve: state.auto_approve,
            iteration: state.iteration,
            last_tool_output: state.last_tool_output.clone(),
            confirmation_prompt: state.confirmation_prompt.clone(),
            confirmation_id: state.confirmation_id,
            transcript_len: state.transcript.len(),
        }
    }
}

/// Events implied by moving from `previous` to `next`.
pub fn diff(previous: &Observed, next: &Observed) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    if previous.run_id != next.run_id
        || previous.status != next.status
        || previous.auto_approve != next.auto_approve
        || previous.iteration != next.iteration
        || previous.last_tool_output != next.last_tool_output
    {
        events.push(ChangeEvent::StatusChanged);
    }
    if previous.run_id != next.run_id || previous.transcript_len != next.transcript_len {
        events.push(ChangeEvent::TranscriptUpdated {
            run_id: next.run_id.clone(),
        });
    }
    if let Some(prompt) = &next.confirmation_prompt
        && previous.confirmation_id != next.confirmation_id
    {
        events.push(ChangeEvent::ConfirmationRequested {
            prompt: prompt.clone(),
        });
    }
    events
}

/// Poll the run controller and broadcast what changed.
pub fn start_status_poller(state: AppState) {
    tokio::spawn(async move {
        let mut previous = Observed::default();
        let mut tick = tokio::time::interval(STATUS_POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let next = Observed::from(&state.controller.status());
            for event in diff(&previous, &next) {
                debug!(?event, "broadcasting status change");
                state.notify(event);
            }
            previous = next;
        }
    });
}

/// Start the document watcher in a background task.
pub fn start_file_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_file_watcher(state).await {
            warn!(error = %e, "file watcher failed");
        }
    });
}

async fn run_file_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(100)),
    )?;

    let agent_dir = &state.paths.agent_dir;
    if agent_dir.exists() {
        watcher.watch(agent_dir, RecursiveMode::Recursive)?;
        info!(path = %agent_dir.display(), "watching agent directory");
    } else {
        warn!(
            path = %agent_dir.display(),
            "agent directory missing; document changes will not be pushed"
        );
    }

    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(100));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                for event in classify(&state.paths, &pending_events) {
                    debug!(?event, "broadcasting file change");
                    state.notify(event);
                }
                pending_events.clear();
            }
        }
    }
}

/// Map a batch of file events to change events, at most one of each kind.
fn classify(paths: &AgentPaths, events: &[NotifyEvent]) -> Vec<ChangeEvent> {
    let mut documents_changed = false;
    let mut transcript_run: Option<String> = None;

    for event in events {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }
        for path in &event.paths {
            if path == &paths.plan_path || path == &paths.scratchpad_path {
                documents_changed = true;
            } else if path.starts_with(&paths.transcripts_dir)
                && let Some(run_id) = run_id_from_transcript(path)
            {
                transcript_run = Some(run_id);
            }
        }
    }

    let mut out = Vec::new();
    if documents_changed {
        out.push(ChangeEvent::DocumentsChanged);
    }
    if let Some(run_id) = transcript_run {
        out.push(ChangeEvent::TranscriptUpdated {
            run_id: Some(run_id),
        });
    }
    out
}

fn run_id_from_transcript(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modify_event(path: std::path::PathBuf) -> NotifyEvent {
        NotifyEvent {
            kind: EventKind::Modify(notify::event::ModifyKind::Any),
            paths: vec![path],
            attrs: Default::default(),
        }
    }

    #[test]
    fn plan_and_scratchpad_edits_collapse_to_one_event() {
        let paths = AgentPaths::new("/tmp/autopilot-sse-tests");
        let events = classify(
            &paths,
            &[
                modify_event(paths.plan_path.clone()),
                modify_event(paths.scratchpad_path.clone()),
                modify_event(paths.config_path.clone()),
            ],
        );
        assert_eq!(events, vec![ChangeEvent::DocumentsChanged]);
    }

    #[test]
    fn transcript_writes_name_the_run() {
        let paths = AgentPaths::new("/tmp/autopilot-sse-tests");
        let events = classify(
            &paths,
            &[modify_event(paths.transcript_path("run-20250101T000000Z"))],
        );
        assert_eq!(
            events,
            vec![ChangeEvent::TranscriptUpdated {
                run_id: Some("run-20250101T000000Z".to_string())
            }]
        );
    }

    #[test]
    fn diff_reports_confirmation_once() {
        let running = Observed {
            run_id: Some("run-1".to_string()),
            status: Some(RunStatus::Running),
            transcript_len: 2,
            ..Observed::default()
        };
        let waiting = Observed {
            status: Some(RunStatus::AwaitingConfirmation),
            confirmation_prompt: Some("The agent wants to run 'write_file'".to_string()),
            confirmation_id: Some(1),
            ..running.clone()
        };

        let events = diff(&running, &waiting);
        assert_eq!(
            events,
            vec![
                ChangeEvent::StatusChanged,
                ChangeEvent::ConfirmationRequested {
                    prompt: "The agent wants to run 'write_file'".to_string()
                }
            ]
        );
        assert!(diff(&waiting, &waiting).is_empty());

        // Same prompt text, new request.
        let again = Observed {
            confirmation_id: Some(2),
            ..waiting.clone()
        };
        assert_eq!(
            diff(&waiting, &again),
            vec![ChangeEvent::ConfirmationRequested {
                prompt: "The agent wants to run 'write_file'".to_string()
            }]
        );
    }

    #[test]
    fn diff_reports_transcript_growth() {
        let before = Observed {
            run_id: Some("run-1".to_string()),
            transcript_len: 2,
            ..Observed::default()
        };
        let after = Observed {
            transcript_len: 4,
            ..before.clone()
        };
        assert_eq!(
            diff(&before, &after),
            vec![ChangeEvent::TranscriptUpdated {
                run_id: Some("run-1".to_string())
            }]
        );
    }

    #[test]
    fn payload_shape() {
        let payload = SsePayload::from(&ChangeEvent::ConfirmationRequested {
            prompt: "approve?".to_string(),
        });
        let json = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"type": "confirmation_requested", "prompt": "approve?"})
        );
    }
}
