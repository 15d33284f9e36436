//! SMTP sink via lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use super::SendSink;
use crate::config::SmtpConfig;
use crate::error::SendError;
use crate::records::LeadRecord;

const SINK_NAME: &str = "smtp";

/// Sends each message as a plain-text email.
pub struct SmtpSink {
    config: SmtpConfig,
}

impl SmtpSink {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Build the outgoing message without sending it.
    fn build_message(&self, record: &LeadRecord, content: &str) -> Result<Message, SendError> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| SendError::InvalidAddress {
                address: self.config.from_address.clone(),
                reason: format!("{e}"),
            })?;
        let to: Mailbox = record.email.parse().map_err(|e| SendError::InvalidAddress {
            address: record.email.clone(),
            reason: format!("{e}"),
        })?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(render_subject(&self.config.subject, record))
            .body(content.to_string())
            .map_err(|e| SendError::DeliveryFailed {
                sink: SINK_NAME.into(),
                reason: format!("Failed to build email: {e}"),
            })
    }
}

#[async_trait]
impl SendSink for SmtpSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn deliver(&self, record: &LeadRecord, content: &str) -> Result<(), SendError> {
        let email = self.build_message(record, content)?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            );

            let transport = SmtpTransport::relay(&config.host)
                .map_err(|e| SendError::DeliveryFailed {
                    sink: SINK_NAME.into(),
                    reason: format!("SMTP relay error: {e}"),
                })?
                .port(config.port)
                .credentials(creds)
                .build();

            transport
                .send(&email)
                .map(|_| ())
                .map_err(|e| SendError::DeliveryFailed {
                    sink: SINK_NAME.into(),
                    reason: format!("SMTP send failed: {e}"),
                })
        })
        .await
        .map_err(|e| SendError::DeliveryFailed {
            sink: SINK_NAME.into(),
            reason: format!("SMTP task panicked: {e}"),
        })??;

        tracing::info!(to = %record.email, "Email sent");
        Ok(())
    }
}

fn render_subject(subject: &str, record: &LeadRecord) -> String {
    subject
        .replace("{website}", &record.website)
        .replace("{email}", &record.email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "me".into(),
            password: SecretString::from("pw"),
            from_address: "me@example.com".into(),
            subject: crate::config::DEFAULT_SUBJECT.into(),
        }
    }

    #[test]
    fn subject_placeholders_are_filled() {
        let record = LeadRecord::new("a@x.com", "x.com");
        assert_eq!(
            render_subject("About {website} for {email}", &record),
            "About x.com for a@x.com"
        );
    }

    #[test]
    fn build_message_rejects_bad_recipient() {
        let sink = SmtpSink::new(config());
        let record = LeadRecord::new("not an address", "x.com");
        assert!(matches!(
            sink.build_message(&record, "hi"),
            Err(SendError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn build_message_accepts_valid_addresses() {
        let sink = SmtpSink::new(config());
        let record = LeadRecord::new("lead@x.com", "x.com");
        let message = sink.build_message(&record, "hi").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Quick question about x.com"));
        assert!(raw.contains("To: lead@x.com"));
    }

    #[tokio::test]
    async fn deliver_to_invalid_address_fails_before_network() {
        let sink = SmtpSink::new(config());
        let record = LeadRecord::new("", "x.com");
        assert!(matches!(
            sink.deliver(&record, "hi").await,
            Err(SendError::InvalidAddress { .. })
        ));
    }
}
