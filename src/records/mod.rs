//! Lead records and the batch store.

pub mod model;
pub mod store;

pub use model::{LeadRecord, RawRow, RecordPatch, RecordStatus};
pub use store::{Progress, RecordStore};
