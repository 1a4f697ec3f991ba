// src/job/mod.rs

//! Job and task data model.
//!
//! - [`status`] holds the status enums and their legal transitions.
//! - [`model`] holds `Job`, `Task` and the persisted `JobRecord`.
//! - [`request`] holds the submission types built from config or code.

pub mod model;
pub mod request;
pub mod status;

pub use model::{Job, JobId, JobKind, JobRecord, Task, TaskKind, TaskParams, short_id};
pub use request::{JobRequest, TaskDefinition};
pub use status::{JobStatus, TaskStatus};
