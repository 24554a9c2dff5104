//! Progress events for the outer job system.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::batch::DocumentState;

/// Collection-level phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Building,
    Merging,
    Resolving,
    Extracting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Merging => "merging",
            Self::Resolving => "resolving",
            Self::Extracting => "extracting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    DocumentStarted {
        job_id: String,
        document_id: String,
    },
    DocumentFinished {
        job_id: String,
        document_id: String,
        state: DocumentState,
        detail: Option<String>,
    },
    PhaseStarted {
        job_id: String,
        collection_id: String,
        phase: Phase,
    },
    PhaseFinished {
        job_id: String,
        collection_id: String,
        phase: Phase,
        elapsed_ms: u64,
    },
}

/// Sends progress events to an optional listener.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    /// A reporter that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A reporter plus the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // listener gone: nothing to report to
            let _ = tx.send(event);
        }
    }
}
