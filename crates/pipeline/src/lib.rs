//! Generation-job pipeline.
//!
//! Ties the pure domain rules of `genflow-core` to the provider adapters:
//!
//! - [`Orchestrator`]: submit, observe, cancel and resubmit jobs; model
//!   selection and health; task groups.
//! - [`poller`]: the per-job polling loop.
//! - [`store`]: persistence hooks for priority lists and health counters.
//! - [`PipelineConfig`] and [`Credentials`]: environment configuration.

pub mod catalog;
pub mod config;
pub mod credentials;
pub mod orchestrator;
pub mod poller;
pub mod store;
pub mod task_group;

pub use catalog::{Catalog, ModelSpec};
pub use config::PipelineConfig;
pub use credentials::Credentials;
pub use orchestrator::{Orchestrator, OrchestratorParts};
pub use poller::PollSchedule;
pub use store::{JsonFileStore, MemoryStore, PersistedState, StateStore, StoreError};
pub use task_group::{GroupSnapshot, MemberSnapshot, TaskGroup};
