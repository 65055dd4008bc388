//! Job Lifecycle Manager.
//!
//! - [`JobManager`]: in-memory job table, per-job channels, status
//!   transitions, and durable write-behind.
//! - [`JobSender`]: the send-function handed to pipeline stages.
//! - [`sweeper`]: background eviction of finished jobs.

pub mod manager;
pub mod sender;
pub mod sweeper;

pub use manager::JobManager;
pub use sender::JobSender;
pub use sweeper::SweepConfig;
