// src/job/request.rs

//! What callers hand to `Coordinator::submit`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::job::model::{JobKind, TaskKind, TaskParams};
use crate::types::Priority;

/// One entry of a composite pipeline as written in config or built in code.
///
/// Everything that is not one of the named fields lands in `params` and is
/// interpreted by the task handler for `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub kind: TaskKind,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub continue_on_error: Option<bool>,

    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(flatten)]
    pub params: TaskParams,
}

impl TaskDefinition {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            name: None,
            continue_on_error: None,
            timeout_seconds: None,
            params: TaskParams::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn continue_on_error(mut self, value: bool) -> Self {
        self.continue_on_error = Some(value);
        self
    }

    pub fn timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub tasks: Vec<TaskDefinition>,
    pub label: Option<String>,
    pub priority: Priority,
    pub repository: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<PathBuf>,
}

impl JobRequest {
    /// A simple job: one `command` task running `argv`.
    pub fn simple<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<serde_json::Value> = argv
            .into_iter()
            .map(|s| serde_json::Value::String(s.into()))
            .collect();
        let task = TaskDefinition::new(TaskKind::Command).param("argv", argv);
        Self::with_tasks(JobKind::Simple, vec![task])
    }

    pub fn composite(tasks: Vec<TaskDefinition>) -> Self {
        Self::with_tasks(JobKind::Composite, tasks)
    }

    fn with_tasks(kind: JobKind, tasks: Vec<TaskDefinition>) -> Self {
        Self {
            kind,
            tasks,
            label: None,
            priority: Priority::default(),
            repository: None,
            environment: BTreeMap::new(),
            working_directory: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}
