// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::job::{JobRequest, TaskDefinition};
use crate::tasks::ToolPaths;
use crate::types::{Priority, StorageMode, TaskFailurePolicy};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// concurrency_limit = 2
/// task_failure_policy = "abort"
///
/// [pipeline.nightly]
/// repository = "/srv/borg/main"
/// priority = "high"
///
/// [[pipeline.nightly.task]]
/// kind = "backup"
/// sources = ["/home", "/etc"]
///
/// [[pipeline.nightly.task]]
/// kind = "prune"
/// keep_daily = 7
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Engine settings from `[config]`.
    #[serde(default)]
    pub config: EngineConfig,

    /// Named pipelines from `[pipeline.<name>]`.
    #[serde(default)]
    pub pipeline: BTreeMap<String, PipelineConfig>,
}

/// Validated configuration. Only constructed through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: EngineConfig,
    pub pipeline: BTreeMap<String, PipelineConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: EngineConfig,
        pipeline: BTreeMap<String, PipelineConfig>,
    ) -> Self {
        Self { config, pipeline }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of jobs running at once.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Output lines kept in memory per job.
    #[serde(default = "default_output_line_retention")]
    pub output_line_retention: usize,

    #[serde(default)]
    pub task_failure_policy: TaskFailurePolicy,

    /// Time between SIGTERM and the forced kill of a cancelled process.
    #[serde(default = "default_cancel_grace_period_seconds")]
    pub cancel_grace_period_seconds: u64,

    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,

    /// Events buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Recent events kept for replay to new subscribers.
    #[serde(default = "default_event_history")]
    pub event_history: usize,

    /// How long a finished job stays in memory.
    #[serde(default = "default_job_retention_seconds")]
    pub job_retention_seconds: u64,

    /// Output lines stored with each persisted job record.
    #[serde(default = "default_persisted_output_lines")]
    pub persisted_output_lines: usize,

    /// Default per-task time budget; unset means no limit.
    #[serde(default)]
    pub task_timeout_seconds: Option<u64>,

    /// Later-enqueued jobs allowed to overtake a waiting job before it is
    /// admitted regardless of priority.
    #[serde(default = "default_starvation_threshold")]
    pub starvation_threshold: u32,

    #[serde(default)]
    pub storage: StorageMode,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Run `borg break-lock` for repositories of interrupted jobs on startup.
    #[serde(default)]
    pub break_stale_locks: bool,

    #[serde(default = "default_borg_binary")]
    pub borg_binary: String,

    #[serde(default = "default_rclone_binary")]
    pub rclone_binary: String,
}

fn default_concurrency_limit() -> usize {
    5
}

fn default_output_line_retention() -> usize {
    1000
}

fn default_cancel_grace_period_seconds() -> u64 {
    5
}

fn default_heartbeat_interval_seconds() -> u64 {
    30
}

fn default_subscriber_buffer() -> usize {
    100
}

fn default_event_history() -> usize {
    50
}

fn default_job_retention_seconds() -> u64 {
    3600
}

fn default_persisted_output_lines() -> usize {
    50
}

fn default_starvation_threshold() -> u32 {
    8
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".borgjobs")
}

fn default_borg_binary() -> String {
    "borg".to_string()
}

fn default_rclone_binary() -> String {
    "rclone".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            output_line_retention: default_output_line_retention(),
            task_failure_policy: TaskFailurePolicy::default(),
            cancel_grace_period_seconds: default_cancel_grace_period_seconds(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            subscriber_buffer: default_subscriber_buffer(),
            event_history: default_event_history(),
            job_retention_seconds: default_job_retention_seconds(),
            persisted_output_lines: default_persisted_output_lines(),
            task_timeout_seconds: None,
            starvation_threshold: default_starvation_threshold(),
            storage: StorageMode::default(),
            state_dir: default_state_dir(),
            break_stale_locks: false,
            borg_binary: default_borg_binary(),
            rclone_binary: default_rclone_binary(),
        }
    }
}

impl EngineConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_period_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_seconds)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_seconds.map(Duration::from_secs)
    }

    pub fn tools(&self) -> ToolPaths {
        ToolPaths {
            borg: self.borg_binary.clone(),
            rclone: self.rclone_binary.clone(),
        }
    }
}

/// `[pipeline.<name>]` section.
///
/// Either `command` (a simple job) or one or more `[[pipeline.<name>.task]]`
/// entries (a composite job), never both.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub repository: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    /// argv of a simple job.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskDefinition>,
}

impl PipelineConfig {
    /// Turn the pipeline into a job submission labelled with its name.
    pub fn to_request(&self, name: &str) -> JobRequest {
        let request = match &self.command {
            Some(argv) => JobRequest::simple(argv.iter().cloned()),
            None => JobRequest::composite(self.tasks.clone()),
        };

        let mut request = request.label(name).priority(self.priority);
        if let Some(repo) = &self.repository {
            request = request.repository(repo.clone());
        }
        if let Some(dir) = &self.working_directory {
            request = request.working_directory(dir.clone());
        }
        for (key, value) in &self.environment {
            request = request.env(key.clone(), value.clone());
        }
        request
    }
}
