//! Lead record data model and row normalization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A loosely-typed ingested row: column name to cell value.
pub type RawRow = serde_json::Map<String, Value>;

/// Column names that carry the email address, compared case-insensitively.
const EMAIL_COLUMNS: &[&str] = &["email"];
/// Column names that carry the website; `website` wins over `url`.
const WEBSITE_COLUMNS: &[&str] = &["website", "url"];

/// Delivery status of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Not yet sent.
    Pending,
    /// Delivered; content is final.
    Sent,
    /// Last send attempt failed; eligible for retry.
    Error,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// One lead to be contacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRecord {
    pub email: String,
    pub website: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_content: Option<String>,
}

impl LeadRecord {
    /// Create a pending record.
    pub fn new(email: impl Into<String>, website: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            website: website.into(),
            status: RecordStatus::Pending,
            generated_content: None,
        }
    }

    /// Normalize a raw row. Never fails: missing columns become empty strings.
    pub fn from_row(row: &RawRow) -> Self {
        Self::new(
            pick_column(row, EMAIL_COLUMNS),
            pick_column(row, WEBSITE_COLUMNS),
        )
    }
}

/// Replacement status/content for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPatch {
    pub status: RecordStatus,
    pub generated_content: Option<String>,
}

impl RecordPatch {
    pub fn sent(content: impl Into<String>) -> Self {
        Self {
            status: RecordStatus::Sent,
            generated_content: Some(content.into()),
        }
    }

    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            status: RecordStatus::Error,
            generated_content: Some(content.into()),
        }
    }
}

/// First non-empty value among `candidates`, in candidate order.
fn pick_column(row: &RawRow, candidates: &[&str]) -> String {
    for wanted in candidates {
        for (key, value) in row {
            if !key.trim().eq_ignore_ascii_case(wanted) {
                continue;
            }
            let value = cell_to_string(value);
            if !value.is_empty() {
                return value;
            }
        }
    }
    String::new()
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}
