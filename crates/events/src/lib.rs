//! Job event stream.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: the job and task-group state changes it carries.

pub mod bus;

pub use bus::{Envelope, EventBus, JobEvent};
