use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// One diagnostic event of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A `console.*` call on the page.
    Console { level: String, text: String },
    /// An uncaught page error or unhandled rejection.
    PageError { message: String },
    /// An action finished (or was never started).
    Action {
        index: usize,
        description: String,
        status: String,
    },
    /// A list element that was not a valid action.
    Anomaly { index: usize, reason: String },
    /// The run was told to stop.
    Abort { reason: String },
    /// Snapshot of the results map at the end of the run.
    Results { results: Value },
}

/// What gets persisted to the diagnostics file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub timestamp: DateTime<Utc>,
    pub trace: Vec<TraceEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_raw_model_text: Option<String>,
}

#[derive(Debug, Default)]
struct TraceState {
    events: Vec<TraceEvent>,
    last_raw_model_text: Option<String>,
}

/// Append-only execution trace, shared between the run and its watchdog.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    inner: Arc<Mutex<TraceState>>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves a valid Vec; keep appending.
    fn state(&self) -> MutexGuard<'_, TraceState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, event: TraceEvent) {
        self.state().events.push(event);
    }

    /// Copy of every event so far, in order.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.state().events.clone()
    }

    pub fn len(&self) -> usize {
        self.state().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().events.is_empty()
    }

    /// True once an abort marker has been recorded.
    pub fn has_abort(&self) -> bool {
        self.state()
            .events
            .iter()
            .any(|e| matches!(e, TraceEvent::Abort { .. }))
    }

    pub fn set_last_raw_model_text(&self, text: impl Into<String>) {
        self.state().last_raw_model_text = Some(text.into());
    }

    pub fn last_raw_model_text(&self) -> Option<String> {
        self.state().last_raw_model_text.clone()
    }

    /// Timestamped snapshot of the trace.
    pub fn diagnostics(&self) -> Diagnostics {
        let state = self.state();
        Diagnostics {
            timestamp: Utc::now(),
            trace: state.events.clone(),
            last_raw_model_text: state.last_raw_model_text.clone(),
        }
    }

    /// Write a snapshot as pretty JSON, creating parent directories.
    pub async fn write_diagnostics(&self, path: &Path) -> Result<()> {
        let snapshot = self.diagnostics();
        let json = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        debug!(
            "Wrote diagnostics ({} events) to {}",
            snapshot.trace.len(),
            path.display()
        );
        Ok(())
    }
}
