// src/output/mod.rs

//! Output capture.
//!
//! - [`line`] defines `OutputLine` and the stream tag.
//! - [`manager`] owns the per-job rings, line splitting and sequencing.
//! - [`tail`] is the live reader handed to observers.
//! - [`sink`] is the handle executors write raw chunks into.

pub mod line;
pub mod manager;
pub mod sink;
pub mod tail;

pub use line::{OutputLine, StreamKind};
pub use manager::{MAX_PARTIAL_LINE, OutputManager, OutputSnapshot};
pub use sink::OutputSink;
pub use tail::{OutputTail, TailItem};
