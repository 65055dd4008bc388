//! Controller process wiring: configuration, shared state, and the
//! orchestration of job launch and cancellation across the job manager and
//! the worker dispatcher.

pub mod config;
pub mod orchestrator;
pub mod state;
pub mod tasks;
