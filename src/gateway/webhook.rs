//! Webhook gateway — POSTs JSON to an automation endpoint and reads back text.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::MessageGateway;
use crate::config::GatewayConfig;
use crate::error::GenerationError;
use crate::records::LeadRecord;

const GATEWAY_NAME: &str = "webhook";

/// Response fields checked, in order, when the backend answers with a JSON object.
const CONTENT_FIELDS: &[&str] = &["content", "text", "output", "message"];

#[derive(Serialize)]
struct GenerateRequest<'a> {
    record: &'a LeadRecord,
    template: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviseRequest<'a> {
    prior_content: &'a str,
    instructions: &'a str,
}

/// HTTP webhook backend.
pub struct WebhookGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl WebhookGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::RequestFailed {
                gateway: GATEWAY_NAME.into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = url, status = status.as_u16(), "Webhook returned error status");
            return Err(GenerationError::BadStatus {
                gateway: GATEWAY_NAME.into(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, self.config.timeout))?;

        let content = extract_content(&body);
        if content.trim().is_empty() {
            return Err(GenerationError::EmptyContent {
                gateway: GATEWAY_NAME.into(),
            });
        }
        debug!(url = url, chars = content.len(), "Webhook returned content");
        Ok(content)
    }
}

#[async_trait]
impl MessageGateway for WebhookGateway {
    fn name(&self) -> &str {
        GATEWAY_NAME
    }

    async fn generate(
        &self,
        record: &LeadRecord,
        template: Option<&str>,
    ) -> Result<String, GenerationError> {
        info!(email = %record.email, website = %record.website, "Requesting draft from webhook");
        let body = GenerateRequest { record, template };
        self.post(&self.config.generate_url, &body).await
    }

    async fn revise(
        &self,
        prior_content: &str,
        instructions: &str,
    ) -> Result<String, GenerationError> {
        info!(instructions = instructions, "Requesting revision from webhook");
        let body = ReviseRequest {
            prior_content,
            instructions,
        };
        self.post(&self.config.revise_url, &body).await
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout {
            gateway: GATEWAY_NAME.into(),
            timeout,
        }
    } else {
        GenerationError::RequestFailed {
            gateway: GATEWAY_NAME.into(),
            reason: e.to_string(),
        }
    }
}

/// Pull the message text out of a webhook response body.
///
/// Accepts a JSON object with one of [`CONTENT_FIELDS`], a bare JSON string,
/// a one-element array wrapping either, or plain text.
fn extract_content(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => content_from_value(&value).unwrap_or_default(),
        Err(_) => body.trim().to_string(),
    }
}

fn content_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(map) => CONTENT_FIELDS
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .map(|s| s.trim().to_string()),
        Value::Array(items) if items.len() == 1 => content_from_value(&items[0]),
        _ => None,
    }
}
