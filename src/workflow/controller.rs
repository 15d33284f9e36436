//! Batch controller — the single owner of the record store and the draft.
//!
//! Every operation takes `&self`. State sits behind a mutex that is never
//! held across a gateway or sink call; while a call is outstanding the
//! `busy` flag rejects every other operation except cancellation.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::{DEFAULT_EVENT_CAPACITY, WorkflowEvent};
use super::state::{Step, WorkflowState};
use crate::config::{FailurePolicy, WorkflowConfig};
use crate::error::{GenerationError, IngestionError, SendError, WorkflowError};
use crate::gateway::MessageGateway;
use crate::records::{LeadRecord, Progress, RawRow, RecordPatch, RecordStatus, RecordStore};
use crate::sink::SendSink;

/// Point-in-time view of the workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    #[serde(flatten)]
    pub state: WorkflowState,
    pub template: Option<String>,
    pub progress: Progress,
    pub records: RecordStore,
}

struct Inner {
    store: RecordStore,
    state: WorkflowState,
    /// Fixed for the lifetime of a batch.
    template: Option<String>,
    /// Used while drafting a single record; never touches the batch template.
    single_template: Option<String>,
    in_flight: Option<CancellationToken>,
}

impl Inner {
    fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            state: self.state.clone(),
            template: self.active_template(),
            progress: self.store.progress(self.state.active_index),
            records: self.store.clone(),
        }
    }

    fn active_template(&self) -> Option<String> {
        if self.state.single {
            self.single_template.clone()
        } else {
            self.template.clone()
        }
    }

    fn begin_call(&mut self) -> CancellationToken {
        let token = CancellationToken::new();
        self.state.busy = true;
        self.in_flight = Some(token.clone());
        token
    }

    fn finish_call(&mut self) {
        self.state.busy = false;
        self.in_flight = None;
    }

    fn active_record(&self) -> Option<LeadRecord> {
        if self.state.single {
            Some(self.state.draft_record())
        } else {
            self.state
                .active_index
                .and_then(|i| self.store.get(i))
                .cloned()
        }
    }

    fn commit(&mut self, index: usize, patch: RecordPatch) {
        match self.store.update_at(index, patch) {
            Some(store) => self.store = store,
            None => warn!(index, total = self.store.len(), "Commit index out of range"),
        }
    }
}

/// A generation about to be sent to the gateway.
struct GenerationCall {
    record: LeadRecord,
    index: Option<usize>,
    template: Option<String>,
    token: CancellationToken,
    /// State to restore on cancellation; `None` marks the step failed instead.
    restore: Option<WorkflowState>,
    /// Return failures as errors rather than only recording them.
    report_errors: bool,
}

/// Drives generate → review → edit → send over a batch of leads.
pub struct BatchController {
    gateway: Arc<dyn MessageGateway>,
    sink: Arc<dyn SendSink>,
    config: WorkflowConfig,
    inner: Mutex<Inner>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl BatchController {
    pub fn new(
        gateway: Arc<dyn MessageGateway>,
        sink: Arc<dyn SendSink>,
        config: WorkflowConfig,
    ) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Arc::new(Self {
            gateway,
            sink,
            config,
            inner: Mutex::new(Inner {
                store: RecordStore::new(),
                state: WorkflowState::new(),
                template: None,
                single_template: None,
                in_flight: None,
            }),
            events,
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Subscribe to workflow events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: WorkflowEvent) {
        // Ok if nobody is listening
        let _ = self.events.send(event);
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        self.inner.lock().await.snapshot()
    }

    /// Replace the store with freshly ingested rows and fix the batch template.
    pub async fn load_batch(
        &self,
        rows: &[RawRow],
        template: Option<String>,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        let mut inner = self.inner.lock().await;
        inner.state.require("load_batch", Step::Input)?;

        let store = RecordStore::load(rows);
        let batch_id = Uuid::new_v4();
        let total = store.len();

        inner.store = store;
        inner.template = normalize_template(template);
        inner.state.clear_draft();
        inner.state.batch_id = Some(batch_id);
        inner.state.active_index = None;
        inner.state.single = false;
        inner.state.last_error = None;

        info!(batch_id = %batch_id, total, "Batch loaded");
        self.emit(WorkflowEvent::BatchLoaded { batch_id, total });
        Ok(inner.snapshot())
    }

    /// Generate the draft for record 0.
    pub async fn start_batch(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        let call = {
            let mut inner = self.inner.lock().await;
            inner.state.require("start_batch", Step::Input)?;

            if inner.store.is_empty() {
                return Err(IngestionError::Empty.into());
            }
            if self.config.validate_records {
                if let Err(e) = inner.store.validate() {
                    warn!(error = %e, "Batch failed validation");
                    return Err(e.into());
                }
            }

            let record = inner
                .store
                .get(0)
                .cloned()
                .ok_or(WorkflowError::NoActiveRecord)?;
            let restore = inner.state.clone();

            inner.state.single = false;
            inner.state.active_index = Some(0);
            inner.state.load_draft(&record);

            info!(batch_id = ?inner.state.batch_id, total = inner.store.len(), "Starting batch");
            GenerationCall {
                record,
                index: Some(0),
                template: inner.template.clone(),
                token: inner.begin_call(),
                restore: Some(restore),
                report_errors: true,
            }
        };

        self.run_generation(call).await
    }

    /// Draft one record outside of any batch.
    pub async fn start_single(
        &self,
        email: &str,
        website: &str,
        template: Option<String>,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        let call = {
            let mut inner = self.inner.lock().await;
            inner.state.require("start_single", Step::Input)?;

            let record = LeadRecord::new(email.trim(), website.trim());
            if self.config.validate_records {
                RecordStore::from_records([record.clone()]).validate()?;
            }

            let restore = inner.state.clone();
            inner.single_template = normalize_template(template);
            inner.state.single = true;
            inner.state.active_index = None;
            inner.state.load_draft(&record);

            info!(email = %record.email, "Starting single record");
            GenerationCall {
                record,
                index: None,
                template: inner.active_template(),
                token: inner.begin_call(),
                restore: Some(restore),
                report_errors: true,
            }
        };

        self.run_generation(call).await
    }

    /// Re-run generation after a failure.
    pub async fn retry(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        let call = {
            let mut inner = self.inner.lock().await;
            inner.state.require("retry", Step::Failed)?;

            let record = inner.active_record().ok_or(WorkflowError::NoActiveRecord)?;
            let index = inner.state.active_index;

            info!(index = ?index, email = %record.email, "Retrying generation");
            GenerationCall {
                record,
                index,
                template: inner.active_template(),
                token: inner.begin_call(),
                restore: None,
                report_errors: true,
            }
        };

        self.run_generation(call).await
    }

    async fn run_generation(&self, call: GenerationCall) -> Result<WorkflowSnapshot, WorkflowError> {
        let GenerationCall {
            record,
            index,
            template,
            token,
            restore,
            report_errors,
        } = call;

        debug!(index = ?index, gateway = self.gateway.name(), "Generating draft");
        let result = race(
            &token,
            self.gateway.generate(&record, template.as_deref()),
            GenerationError::Cancelled,
        )
        .await;

        let mut inner = self.inner.lock().await;
        inner.finish_call();

        match result {
            Ok(content) => {
                inner.state.draft_content = content;
                inner.state.last_error = None;
                inner.state.transition_to(Step::Generated, "draft ready")?;

                info!(index = ?index, email = %record.email, "Draft ready");
                self.emit(WorkflowEvent::DraftReady {
                    index,
                    email: record.email,
                });
                Ok(inner.snapshot())
            }
            Err(GenerationError::Cancelled) => {
                match restore {
                    Some(prior) => inner.state = prior,
                    None => {
                        inner.state.last_error = Some(GenerationError::Cancelled.to_string());
                        inner.state.transition_to(Step::Failed, "generation cancelled")?;
                    }
                }

                info!(index = ?index, "Generation cancelled");
                self.emit(WorkflowEvent::Cancelled {
                    operation: "generate".into(),
                });
                if report_errors {
                    Err(GenerationError::Cancelled.into())
                } else {
                    Ok(inner.snapshot())
                }
            }
            Err(e) => {
                warn!(index = ?index, email = %record.email, error = %e, "Generation failed");
                inner.state.last_error = Some(e.to_string());
                self.emit(WorkflowEvent::GenerationFailed {
                    index,
                    error: e.to_string(),
                });

                match self.config.failure_policy {
                    FailurePolicy::Surface => {
                        inner.state.transition_to(Step::Failed, "generation failed")?;
                        if report_errors {
                            Err(e.into())
                        } else {
                            Ok(inner.snapshot())
                        }
                    }
                    FailurePolicy::Parity => {
                        inner.state.draft_content.clear();
                        inner
                            .state
                            .transition_to(Step::Generated, "generation failed, empty draft")?;
                        Ok(inner.snapshot())
                    }
                }
            }
        }
    }

    /// Open the draft for revision instructions.
    pub async fn edit(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        let mut inner = self.inner.lock().await;
        inner.state.require("edit", Step::Generated)?;
        if inner.state.draft_content.trim().is_empty() {
            return Err(WorkflowError::EmptyDraft);
        }

        inner.state.edit_instructions = None;
        inner.state.transition_to(Step::Editing, "edit requested")?;

        let index = inner.state.active_index;
        debug!(index = ?index, "Editing draft");
        self.emit(WorkflowEvent::EditStarted { index });
        Ok(inner.snapshot())
    }

    pub async fn set_edit_instructions(
        &self,
        instructions: impl Into<String>,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        let mut inner = self.inner.lock().await;
        inner.state.require("set_edit_instructions", Step::Editing)?;
        inner.state.edit_instructions = Some(instructions.into());
        Ok(inner.snapshot())
    }

    /// Ask the gateway to revise the draft. Empty instructions are rejected
    /// without touching any state.
    pub async fn submit_edit(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        let (prior, instructions, index, token) = {
            let mut inner = self.inner.lock().await;
            inner.state.require("submit_edit", Step::Editing)?;

            let instructions = match inner.state.edit_instructions.as_deref().map(str::trim) {
                Some(text) if !text.is_empty() => text.to_string(),
                _ => {
                    debug!("Rejecting edit with empty instructions");
                    return Err(WorkflowError::EditRejected);
                }
            };

            (
                inner.state.draft_content.clone(),
                instructions,
                inner.state.active_index,
                inner.begin_call(),
            )
        };

        info!(index = ?index, instructions = %instructions, "Revising draft");
        let result = race(
            &token,
            self.gateway.revise(&prior, &instructions),
            GenerationError::Cancelled,
        )
        .await;

        let mut inner = self.inner.lock().await;
        inner.finish_call();

        match result {
            Ok(content) => {
                inner.state.draft_content = content;
                inner.state.edit_instructions = None;
                inner.state.last_error = None;
                inner.state.transition_to(Step::Generated, "draft revised")?;

                info!(index = ?index, "Draft revised");
                self.emit(WorkflowEvent::DraftRevised { index });
                Ok(inner.snapshot())
            }
            Err(GenerationError::Cancelled) => {
                info!(index = ?index, "Revision cancelled");
                self.emit(WorkflowEvent::Cancelled {
                    operation: "revise".into(),
                });
                Err(GenerationError::Cancelled.into())
            }
            Err(e) => {
                warn!(index = ?index, error = %e, "Revision failed");
                inner.state.last_error = Some(e.to_string());
                self.emit(WorkflowEvent::RevisionFailed {
                    index,
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Drop the instructions and return to the unchanged draft.
    pub async fn cancel_edit(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        let mut inner = self.inner.lock().await;
        inner.state.require("cancel_edit", Step::Editing)?;

        inner.state.edit_instructions = None;
        inner.state.transition_to(Step::Generated, "edit cancelled")?;

        let index = inner.state.active_index;
        debug!(index = ?index, "Edit cancelled");
        self.emit(WorkflowEvent::EditCancelled { index });
        Ok(inner.snapshot())
    }

    /// Deliver the draft, commit it, and move to the next record.
    ///
    /// The record is marked sent only after the sink confirms delivery; a
    /// failed delivery marks it `Error` and keeps the draft for another try.
    /// A failed or cancelled generation of the next draft does not fail the
    /// send: it shows up in the returned snapshot.
    pub async fn send(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        let (record, content, index, token) = {
            let mut inner = self.inner.lock().await;
            if inner.state.busy {
                return Err(WorkflowError::Busy);
            }

            if !inner.state.single && inner.store.is_empty() {
                debug!("Send with no batch loaded");
                inner.state.clear_draft();
                inner.state.active_index = None;
                if inner.state.step != Step::Input {
                    inner.state.transition_to(Step::Input, "nothing to send")?;
                }
                return Ok(inner.snapshot());
            }

            inner.state.require("send", Step::Generated)?;
            let record = inner.active_record().ok_or(WorkflowError::NoActiveRecord)?;
            (
                record,
                inner.state.draft_content.clone(),
                inner.state.active_index,
                inner.begin_call(),
            )
        };

        info!(index = ?index, to = %record.email, sink = self.sink.name(), "Sending draft");
        let result = race(
            &token,
            self.sink.deliver(&record, &content),
            SendError::Cancelled,
        )
        .await;

        let next = {
            let mut inner = self.inner.lock().await;

            match result {
                Ok(()) => {}
                Err(SendError::Cancelled) => {
                    inner.finish_call();
                    info!(index = ?index, "Send cancelled");
                    self.emit(WorkflowEvent::Cancelled {
                        operation: "send".into(),
                    });
                    return Err(SendError::Cancelled.into());
                }
                Err(e) => {
                    inner.finish_call();
                    error!(index = ?index, to = %record.email, error = %e, "Send failed");
                    if let Some(i) = index {
                        inner.commit(i, RecordPatch::failed(content));
                    }
                    inner.state.last_error = Some(e.to_string());
                    self.emit(WorkflowEvent::SendFailed {
                        index,
                        email: record.email,
                        error: e.to_string(),
                    });
                    return Err(e.into());
                }
            }

            info!(index = ?index, to = %record.email, "Record sent");
            self.emit(WorkflowEvent::RecordSent {
                index,
                email: record.email.clone(),
            });

            let Some(i) = index else {
                inner.finish_call();
                inner.state.clear_draft();
                inner.state.single = false;
                inner.single_template = None;
                inner.state.last_error = None;
                inner.state.transition_to(Step::Input, "single record sent")?;
                return Ok(inner.snapshot());
            };

            inner.commit(i, RecordPatch::sent(content));
            inner.state.last_error = None;

            let next_index = i + 1;
            match inner.store.get(next_index).cloned() {
                Some(next_record) => {
                    inner.state.active_index = Some(next_index);
                    inner.state.load_draft(&next_record);
                    // Stays busy until the next draft arrives.
                    let token = inner.begin_call();
                    GenerationCall {
                        record: next_record,
                        index: Some(next_index),
                        template: inner.template.clone(),
                        token,
                        restore: None,
                        report_errors: false,
                    }
                }
                None => {
                    inner.finish_call();
                    let sent = inner.store.count_by_status(RecordStatus::Sent);
                    let batch_id = inner.state.batch_id;

                    inner.store = RecordStore::new();
                    inner.template = None;
                    inner.state.clear_draft();
                    inner.state.active_index = None;
                    inner.state.batch_id = None;
                    inner.state.transition_to(Step::Input, "batch completed")?;

                    info!(batch_id = ?batch_id, sent, "Batch completed");
                    self.emit(WorkflowEvent::BatchCompleted { batch_id, sent });
                    return Ok(inner.snapshot());
                }
            }
        };

        self.run_generation(next).await
    }

    /// Abort the outstanding gateway or sink call, if any.
    pub async fn cancel_in_flight(&self) -> Result<(), WorkflowError> {
        let inner = self.inner.lock().await;
        match &inner.in_flight {
            Some(token) => {
                info!("Cancelling in-flight call");
                token.cancel();
                Ok(())
            }
            None => Err(WorkflowError::NothingInFlight),
        }
    }

    /// Abandon the batch and return to input.
    pub async fn reset(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        let mut inner = self.inner.lock().await;
        if inner.state.busy {
            return Err(WorkflowError::Busy);
        }

        inner.store = RecordStore::new();
        inner.template = None;
        inner.single_template = None;
        inner.state.clear_draft();
        inner.state.active_index = None;
        inner.state.batch_id = None;
        inner.state.single = false;
        inner.state.last_error = None;
        inner.state.transition_to(Step::Input, "reset")?;

        info!("Workflow reset");
        self.emit(WorkflowEvent::Reset);
        Ok(inner.snapshot())
    }
}

fn normalize_template(template: Option<String>) -> Option<String> {
    template.filter(|t| !t.trim().is_empty())
}

/// Run `call` unless `token` fires first.
async fn race<T, E>(
    token: &CancellationToken,
    call: impl Future<Output = Result<T, E>>,
    cancelled: E,
) -> Result<T, E> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(cancelled),
        result = call => result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::sink::LogSink;

    /// Gateway that blocks on a gate before answering.
    struct GatedGateway {
        gate: Arc<Notify>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageGateway for GatedGateway {
        fn name(&self) -> &str {
            "gated"
        }

        async fn generate(
            &self,
            record: &LeadRecord,
            _template: Option<&str>,
        ) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(format!("Hello {}", record.website))
        }

        async fn revise(&self, prior: &str, _instructions: &str) -> Result<String, GenerationError> {
            self.gate.notified().await;
            Ok(format!("{prior}!"))
        }
    }

    fn rows() -> Vec<RawRow> {
        vec![
            json!({"email": "a@x.com", "website": "x.com"}),
            json!({"email": "b@y.com", "website": "y.com"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
    }

    fn gated() -> (Arc<BatchController>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(GatedGateway {
            gate: Arc::clone(&gate),
            calls: AtomicUsize::new(0),
        });
        let controller = BatchController::new(gateway, Arc::new(LogSink::new()), WorkflowConfig::default());
        (controller, gate)
    }

    async fn wait_until_busy(controller: &BatchController) {
        for _ in 0..200 {
            if controller.snapshot().await.state.busy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("controller never became busy");
    }

    #[tokio::test]
    async fn operations_rejected_while_busy() {
        let (controller, gate) = gated();
        controller.load_batch(&rows(), None).await.unwrap();

        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.start_batch().await })
        };
        wait_until_busy(&controller).await;

        assert!(matches!(controller.send().await, Err(WorkflowError::Busy)));
        assert!(matches!(controller.edit().await, Err(WorkflowError::Busy)));
        assert!(matches!(controller.start_batch().await, Err(WorkflowError::Busy)));
        assert!(matches!(controller.reset().await, Err(WorkflowError::Busy)));

        gate.notify_one();
        let snapshot = task.await.unwrap().unwrap();
        assert!(!snapshot.state.busy);
        assert_eq!(snapshot.state.step, Step::Generated);
        assert_eq!(snapshot.state.draft_content, "Hello x.com");
    }

    #[tokio::test]
    async fn cancelling_start_restores_input() {
        let (controller, _gate) = gated();
        controller.load_batch(&rows(), None).await.unwrap();
        let before = controller.snapshot().await;

        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.start_batch().await })
        };
        wait_until_busy(&controller).await;
        controller.cancel_in_flight().await.unwrap();

        assert!(matches!(
            task.await.unwrap(),
            Err(WorkflowError::Generation(GenerationError::Cancelled))
        ));
        let after = controller.snapshot().await;
        assert_eq!(after.state, before.state);
        assert_eq!(after.state.active_index, None);
        assert!(!after.state.busy);
    }

    #[tokio::test]
    async fn cancelling_revision_keeps_editing_and_draft() {
        let (controller, gate) = gated();
        controller.load_batch(&rows(), None).await.unwrap();
        gate.notify_one();
        controller.start_batch().await.unwrap();
        controller.edit().await.unwrap();
        controller.set_edit_instructions("shorter").await.unwrap();

        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.submit_edit().await })
        };
        wait_until_busy(&controller).await;
        controller.cancel_in_flight().await.unwrap();
        assert!(task.await.unwrap().is_err());

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.state.step, Step::Editing);
        assert_eq!(snapshot.state.draft_content, "Hello x.com");
        assert_eq!(snapshot.state.edit_instructions.as_deref(), Some("shorter"));
    }

    #[tokio::test]
    async fn cancel_without_call_is_an_error() {
        let (controller, _gate) = gated();
        assert!(matches!(
            controller.cancel_in_flight().await,
            Err(WorkflowError::NothingInFlight)
        ));
    }

    #[tokio::test]
    async fn template_is_fixed_at_load() {
        let (controller, _gate) = gated();
        let snapshot = controller
            .load_batch(&rows(), Some("Mention our agency".into()))
            .await
            .unwrap();
        assert_eq!(snapshot.template.as_deref(), Some("Mention our agency"));

        let blank = controller.reset().await.unwrap();
        assert_eq!(blank.template, None);
        let snapshot = controller.load_batch(&rows(), Some("   ".into())).await.unwrap();
        assert_eq!(snapshot.template, None);
    }
}
