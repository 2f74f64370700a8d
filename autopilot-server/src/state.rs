//! Shared application state for the control server.

use std::sync::Arc;

use autopilot::controller::RunController;
use autopilot::io::config::GeminiConfig;
use autopilot::io::init::AgentPaths;
use tokio::sync::broadcast;

/// Events broadcast to SSE clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Run status, auto-approve, iteration or last tool output changed.
    StatusChanged,
    /// The run transcript grew.
    TranscriptUpdated { run_id: Option<String> },
    /// The loop is waiting for approve/deny.
    ConfirmationRequested { prompt: String },
    /// Plan or scratchpad changed on disk.
    DocumentsChanged,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RunController>,
    pub paths: AgentPaths,
    /// Used for model listing.
    pub gemini: GeminiConfig,
    /// Broadcast sender for change events.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
}

impl AppState {
    pub fn new(controller: RunController, paths: AgentPaths, gemini: GeminiConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            controller: Arc::new(controller),
            paths,
            gemini,
            event_tx: Arc::new(event_tx),
        }
    }

    /// Broadcast an event; having no subscribers is fine.
    pub fn notify(&self, event: ChangeEvent) {
        let _ = self.event_tx.send(event);
    }
}
