//! Lead Reactivator — human-in-the-loop outreach over a batch of leads.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod records;
pub mod sink;
pub mod workflow;
