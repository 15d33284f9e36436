//! Generation gateway — the external service that writes and revises drafts.

pub mod webhook;

pub use webhook::WebhookGateway;

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::records::LeadRecord;

/// One-shot draft generation backend.
///
/// Calls are not retried, deduplicated or cached: every invocation reaches
/// the backend.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Backend name for logs and errors.
    fn name(&self) -> &str;

    /// Write a fresh outreach message for `record`.
    async fn generate(
        &self,
        record: &LeadRecord,
        template: Option<&str>,
    ) -> Result<String, GenerationError>;

    /// Rewrite `prior_content` following `instructions`.
    async fn revise(&self, prior_content: &str, instructions: &str)
    -> Result<String, GenerationError>;
}
