// src/types.rs

//! Small shared enums used by the config layer and the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What happens to the rest of a composite job when one of its tasks fails.
///
/// - `Abort`: remaining tasks are skipped and the job fails (default).
/// - `Continue`: the next task still runs; the job ends `PARTIAL_SUCCESS`
///   if anything succeeded.
///
/// Individual tasks can override this with `continue_on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskFailurePolicy {
    Abort,
    Continue,
}

impl Default for TaskFailurePolicy {
    fn default() -> Self {
        TaskFailurePolicy::Abort
    }
}

impl FromStr for TaskFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(TaskFailurePolicy::Abort),
            "continue" => Ok(TaskFailurePolicy::Continue),
            other => Err(format!(
                "invalid task_failure_policy: {other} (expected \"abort\" or \"continue\")"
            )),
        }
    }
}

/// Where job records are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One JSON file per job under `<state_dir>/jobs/`.
    File,
    /// In memory only (lost on restart, so recovery has nothing to do).
    Memory,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::File
    }
}

/// Admission priority. Higher priorities are admitted first; equal
/// priorities are admitted in enqueue order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!(
                "invalid priority: {other} (expected low, normal, high or critical)"
            )),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}
