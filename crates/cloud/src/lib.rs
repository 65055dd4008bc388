//! Worker Dispatcher: runs each job on its own short-lived compute worker.
//!
//! - [`ComputeProvider`]: provisioning API contract.
//! - [`FlyMachinesProvider`]: the Fly Machines implementation.
//! - [`WorkerDispatcher`]: naming, environment, readiness polling, and
//!   best-effort teardown on top of a provider.
//! - [`WorkerRegistry`]: which worker runs which job.
//! - [`poll`]: the bounded polling primitive.

pub mod config;
pub mod dispatcher;
pub mod fly;
pub mod poll;
pub mod provider;
pub mod registry;

pub use config::DispatcherConfig;
pub use dispatcher::{DispatchError, WorkerDispatcher};
pub use fly::FlyMachinesProvider;
pub use provider::{ComputeProvider, GuestSpec, MachineRequest, ProviderError, WorkerHandle, WorkerState};
pub use registry::WorkerRegistry;
