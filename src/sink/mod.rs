//! Send sink — delivers a finalized message for one lead.

pub mod smtp;

pub use smtp::SmtpSink;

use async_trait::async_trait;
use tracing::info;

use crate::error::SendError;
use crate::records::LeadRecord;

/// Outbound delivery backend.
#[async_trait]
pub trait SendSink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `content` to `record.email`. Success means the message left.
    async fn deliver(&self, record: &LeadRecord, content: &str) -> Result<(), SendError>;
}

/// Dry-run sink: logs the message instead of sending it.
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SendSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, record: &LeadRecord, content: &str) -> Result<(), SendError> {
        info!(
            to = %record.email,
            website = %record.website,
            preview = %content.chars().take(100).collect::<String>(),
            "Dry run: message not sent"
        );
        Ok(())
    }
}
