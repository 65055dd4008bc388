//! Shared domain types for the dossier report orchestrator.
//!
//! - [`job`]: the job record, its state machine, and listing summaries.
//! - [`job_events`]: event kinds exchanged between pipeline stages and
//!   subscribers.
//! - [`recovery`]: recovery of JSON objects from imperfect LLM output.

pub mod error;
pub mod job;
pub mod job_events;
pub mod recovery;
pub mod types;
