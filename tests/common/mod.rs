//! Stub backends shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use lead_reactivator::config::WorkflowConfig;
use lead_reactivator::error::{GenerationError, SendError};
use lead_reactivator::gateway::MessageGateway;
use lead_reactivator::records::{LeadRecord, RawRow};
use lead_reactivator::sink::SendSink;
use lead_reactivator::workflow::BatchController;

/// Gateway that answers from a script, falling back to a canned draft.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    pub generate_calls: AtomicUsize,
    pub revise_calls: AtomicUsize,
    pub seen_emails: Mutex<Vec<String>>,
    pub seen_templates: Mutex<Vec<Option<String>>>,
    /// Zero-based generate call that never answers.
    stall_on: Mutex<Option<usize>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, result: Result<String, GenerationError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn fail_next(&self) {
        self.push(Err(GenerationError::RequestFailed {
            gateway: "scripted".into(),
            reason: "backend down".into(),
        }));
    }

    /// Make the `call`-th generate (zero-based) hang until cancelled.
    pub fn stall_on(&self, call: usize) {
        *self.stall_on.lock().unwrap() = Some(call);
    }

    pub fn generated(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn revised(&self) -> usize {
        self.revise_calls.load(Ordering::SeqCst)
    }
}

/// The draft the scripted gateway writes when nothing is scripted.
pub fn canned_draft(email: &str, website: &str) -> String {
    format!("Hi {email}, about {website}")
}

#[async_trait]
impl MessageGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        record: &LeadRecord,
        template: Option<&str>,
    ) -> Result<String, GenerationError> {
        let call = self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let stall = *self.stall_on.lock().unwrap() == Some(call);
        if stall {
            std::future::pending::<()>().await;
        }
        self.seen_emails.lock().unwrap().push(record.email.clone());
        self.seen_templates
            .lock()
            .unwrap()
            .push(template.map(str::to_string));

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(canned_draft(&record.email, &record.website)))
    }

    async fn revise(&self, prior: &str, instructions: &str) -> Result<String, GenerationError> {
        self.revise_calls.fetch_add(1, Ordering::SeqCst);
        if instructions == "fail" {
            return Err(GenerationError::RequestFailed {
                gateway: "scripted".into(),
                reason: "revision refused".into(),
            });
        }
        Ok(format!("{prior} ({instructions})"))
    }
}

/// Sink that records deliveries and fails on demand.
#[derive(Default)]
pub struct RecordingSink {
    failures: Mutex<VecDeque<SendError>>,
    stall_next: AtomicBool,
    pub delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self) {
        self.failures
            .lock()
            .unwrap()
            .push_back(SendError::DeliveryFailed {
                sink: "recording".into(),
                reason: "mailbox full".into(),
            });
    }

    /// Make the next delivery hang until cancelled.
    pub fn stall_next(&self) {
        self.stall_next.store(true, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl SendSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, record: &LeadRecord, content: &str) -> Result<(), SendError> {
        if self.stall_next.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.delivered
            .lock()
            .unwrap()
            .push((record.email.clone(), content.to_string()));
        Ok(())
    }
}

pub fn rows(pairs: &[(&str, &str)]) -> Vec<RawRow> {
    pairs
        .iter()
        .map(|(email, website)| {
            json!({"email": email, "website": website})
                .as_object()
                .cloned()
                .unwrap()
        })
        .collect()
}

/// Poll until the controller reports an outstanding call.
pub async fn wait_until_busy(controller: &BatchController) {
    for _ in 0..200 {
        if controller.snapshot().await.state.busy {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("controller never became busy");
}

pub fn controller_with(
    gateway: &Arc<ScriptedGateway>,
    sink: &Arc<RecordingSink>,
    config: WorkflowConfig,
) -> Arc<BatchController> {
    BatchController::new(
        Arc::clone(gateway) as Arc<dyn MessageGateway>,
        Arc::clone(sink) as Arc<dyn SendSink>,
        config,
    )
}
