//! Draft workflow state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::records::LeadRecord;

/// Cap on the recorded step history.
const MAX_TRANSITIONS: usize = 100;

/// Which screen of the review loop the operator is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// No draft; waiting for a batch or a single record.
    Input,
    /// A draft is ready for review.
    Generated,
    /// The operator is writing revision instructions.
    Editing,
    /// Generation failed; the operator must retry.
    Failed,
}

impl Step {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: Step) -> bool {
        use Step::*;
        matches!(
            (self, target),
            // Abandon or complete from anywhere
            (_, Input) |
            (Input, Generated) | (Input, Failed) |
            // Send advancing to the next record
            (Generated, Generated) | (Generated, Failed) |
            (Generated, Editing) |
            (Editing, Generated) |
            (Failed, Generated) | (Failed, Failed)
        )
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Generated => "generated",
            Self::Editing => "editing",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A recorded step change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepTransition {
    pub from: Step,
    pub to: Step,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// The draft being worked on, plus cursor and gating flags.
///
/// Draft fields are a working copy of the active record; they reach the
/// record store only when the record is sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    /// Identifies the loaded batch, if any.
    pub batch_id: Option<Uuid>,
    /// Serialized as -1 when no record is active.
    #[serde(serialize_with = "serialize_index")]
    pub active_index: Option<usize>,
    pub step: Step,
    pub draft_email: String,
    pub draft_website: String,
    pub draft_content: String,
    pub edit_instructions: Option<String>,
    /// True while a generate/revise/send call is outstanding.
    pub busy: bool,
    /// Drafting one record outside of any batch.
    pub single: bool,
    pub last_error: Option<String>,
    pub transitions: Vec<StepTransition>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            batch_id: None,
            active_index: None,
            step: Step::Input,
            draft_email: String::new(),
            draft_website: String::new(),
            draft_content: String::new(),
            edit_instructions: None,
            busy: false,
            single: false,
            last_error: None,
            transitions: Vec::new(),
        }
    }

    /// Move to `target`, recording the change.
    pub fn transition_to(
        &mut self,
        target: Step,
        reason: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        if !self.step.can_transition_to(target) {
            return Err(WorkflowError::InvalidStep {
                operation: "transition",
                step: self.step,
            });
        }

        self.transitions.push(StepTransition {
            from: self.step,
            to: target,
            timestamp: Utc::now(),
            reason: reason.into(),
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.step = target;
        Ok(())
    }

    /// Fail with `InvalidStep` unless the workflow is idle and in `expected`.
    pub fn require(&self, operation: &'static str, expected: Step) -> Result<(), WorkflowError> {
        if self.busy {
            return Err(WorkflowError::Busy);
        }
        if self.step != expected {
            return Err(WorkflowError::InvalidStep {
                operation,
                step: self.step,
            });
        }
        Ok(())
    }

    /// Start a fresh draft for `record`.
    pub fn load_draft(&mut self, record: &LeadRecord) {
        self.draft_email = record.email.clone();
        self.draft_website = record.website.clone();
        self.draft_content.clear();
        self.edit_instructions = None;
        self.last_error = None;
    }

    pub fn clear_draft(&mut self) {
        self.draft_email.clear();
        self.draft_website.clear();
        self.draft_content.clear();
        self.edit_instructions = None;
    }

    /// The draft as a record, for single-record mode.
    pub fn draft_record(&self) -> LeadRecord {
        LeadRecord::new(self.draft_email.clone(), self.draft_website.clone())
    }
}

fn serialize_index<S: Serializer>(index: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
    match index {
        Some(i) => serializer.serialize_i64(*i as i64),
        None => serializer.serialize_i64(-1),
    }
}
