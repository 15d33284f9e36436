//! Record store: the ordered batch of leads.
//!
//! Records are shared behind `Arc`, so `update_at` produces a new store that
//! reuses every record it did not touch.

use std::sync::Arc;

use serde::Serialize;

use super::model::{LeadRecord, RawRow, RecordPatch, RecordStatus};
use crate::error::{IngestionError, RowIssue, RowProblem};

/// Ordered, index-addressed sequence of lead records.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Arc<LeadRecord>>,
}

/// Progress through a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    /// One-based position of the active record, 0 when idle.
    pub position: usize,
    pub total: usize,
    pub sent: usize,
    pub errors: usize,
    pub pending: usize,
    /// `position / total * 100`, 0 for an empty store.
    pub percent: f32,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize raw rows into pending records.
    pub fn load<'a>(rows: impl IntoIterator<Item = &'a RawRow>) -> Self {
        Self::from_records(rows.into_iter().map(LeadRecord::from_row))
    }

    pub fn from_records(records: impl IntoIterator<Item = LeadRecord>) -> Self {
        Self {
            records: records.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LeadRecord> {
        self.records.get(index).map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LeadRecord> {
        self.records.iter().map(Arc::as_ref)
    }

    /// Replace status/content of exactly one record. Returns `None` if out of range.
    pub fn update_at(&self, index: usize, patch: RecordPatch) -> Option<Self> {
        let current = self.records.get(index)?;
        let updated = LeadRecord {
            status: patch.status,
            generated_content: patch.generated_content,
            ..LeadRecord::clone(current)
        };

        let mut records = self.records.clone();
        records[index] = Arc::new(updated);
        Some(Self { records })
    }

    pub fn count_by_status(&self, status: RecordStatus) -> usize {
        self.iter().filter(|r| r.status == status).count()
    }

    /// Check every row for a usable email and website.
    pub fn validate(&self) -> Result<(), IngestionError> {
        if self.is_empty() {
            return Err(IngestionError::Empty);
        }

        let mut issues = Vec::new();
        for (row, record) in self.iter().enumerate() {
            if record.email.is_empty() {
                issues.push(RowIssue {
                    row,
                    problem: RowProblem::MissingEmail,
                });
            } else if !record.email.contains('@') {
                issues.push(RowIssue {
                    row,
                    problem: RowProblem::InvalidEmail,
                });
            }
            if record.website.is_empty() {
                issues.push(RowIssue {
                    row,
                    problem: RowProblem::MissingWebsite,
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(IngestionError::InvalidRows(issues))
        }
    }

    /// Progress report for the record at `active_index` (if any).
    pub fn progress(&self, active_index: Option<usize>) -> Progress {
        let total = self.len();
        let position = active_index.map(|i| i + 1).unwrap_or(0).min(total);
        let percent = if total == 0 {
            0.0
        } else {
            position as f32 / total as f32 * 100.0
        };
        Progress {
            position,
            total,
            sent: self.count_by_status(RecordStatus::Sent),
            errors: self.count_by_status(RecordStatus::Error),
            pending: self.count_by_status(RecordStatus::Pending),
            percent,
        }
    }

    #[cfg(test)]
    pub(crate) fn shares_record_with(&self, other: &Self, index: usize) -> bool {
        match (self.records.get(index), other.records.get(index)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for RecordStore {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}
