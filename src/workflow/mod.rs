//! The review loop: batch cursor, draft state machine and events.

pub mod controller;
pub mod events;
pub mod state;

pub use controller::{BatchController, WorkflowSnapshot};
pub use events::WorkflowEvent;
pub use state::{Step, StepTransition, WorkflowState};
