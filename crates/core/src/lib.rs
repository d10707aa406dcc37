//! Pure domain logic for generation-job orchestration.
//!
//! No I/O lives here: canonical types, the error taxonomy, the status
//! normalizer, model health bookkeeping, priority selection and task-group
//! aggregation rules.

pub mod config;
pub mod error;
pub mod health;
pub mod job;
pub mod priority;
pub mod status;
pub mod task_group;
pub mod types;
