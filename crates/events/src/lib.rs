//! Per-job event fan-out.
//!
//! - [`JobChannel`]: in-process publish/subscribe for one job, backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: the event envelope.
//! - [`Subscription`]: a listener handle; dropping it unsubscribes.

pub mod bus;

pub use bus::{JobChannel, JobEvent, Subscription};
