// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - admission control ([`queue`])
//! - the in-memory job registry ([`registry`])
//! - the public [`Coordinator`] handle that submits, cancels and observes
//!   jobs
//! - the per-job drivers that sequence tasks ([`driver`])
//!
//! The queue is a plain synchronous state machine: its methods return the
//! jobs they admitted and the coordinator starts them. All async work
//! (processes, persistence) happens in the drivers.

pub mod coordinator;
mod driver;
pub mod queue;
mod registry;

pub use coordinator::Coordinator;
pub use queue::{QueueEntry, QueueManager, QueueStats};
