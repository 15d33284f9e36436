//! Workflow events broadcast to observers.

use serde::Serialize;
use uuid::Uuid;

/// Default broadcast channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something observable happened in the review loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    BatchLoaded { batch_id: Uuid, total: usize },
    DraftReady { index: Option<usize>, email: String },
    GenerationFailed { index: Option<usize>, error: String },
    EditStarted { index: Option<usize> },
    EditCancelled { index: Option<usize> },
    DraftRevised { index: Option<usize> },
    RevisionFailed { index: Option<usize>, error: String },
    RecordSent { index: Option<usize>, email: String },
    SendFailed { index: Option<usize>, email: String, error: String },
    BatchCompleted { batch_id: Option<Uuid>, sent: usize },
    /// An in-flight call was cancelled by the operator.
    Cancelled { operation: String },
    Reset,
}
