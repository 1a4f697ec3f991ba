#![allow(dead_code)]

use std::sync::Arc;

use borgjobs::config::EngineConfig;
use borgjobs::engine::Coordinator;
use borgjobs::exec::ExecutorBackend;
use borgjobs::job::{TaskDefinition, TaskKind};
use borgjobs::persistence::{MemoryStore, PersistenceGateway};
use borgjobs::types::{StorageMode, TaskFailurePolicy};

/// Builder for `EngineConfig` with test-friendly defaults: in-memory
/// storage, a 1s cancel grace period and a heartbeat far enough away that it
/// never shows up unless a test asks for it.
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                storage: StorageMode::Memory,
                cancel_grace_period_seconds: 1,
                heartbeat_interval_seconds: 3600,
                ..EngineConfig::default()
            },
        }
    }

    pub fn concurrency_limit(mut self, n: usize) -> Self {
        self.config.concurrency_limit = n;
        self
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.config.task_failure_policy = TaskFailurePolicy::Continue;
        self
    }

    pub fn output_line_retention(mut self, n: usize) -> Self {
        self.config.output_line_retention = n;
        self
    }

    pub fn persisted_output_lines(mut self, n: usize) -> Self {
        self.config.persisted_output_lines = n;
        self
    }

    pub fn subscriber_buffer(mut self, n: usize) -> Self {
        self.config.subscriber_buffer = n;
        self
    }

    pub fn job_retention_seconds(mut self, secs: u64) -> Self {
        self.config.job_retention_seconds = secs;
        self
    }

    pub fn starvation_threshold(mut self, n: u32) -> Self {
        self.config.starvation_threshold = n;
        self
    }

    pub fn break_stale_locks(mut self, enabled: bool) -> Self {
        self.config.break_stale_locks = enabled;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinator over the given executor with a fresh `MemoryStore`.
pub fn coordinator_with(
    config: EngineConfig,
    executor: Arc<dyn ExecutorBackend>,
) -> (Coordinator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let gateway: Arc<dyn PersistenceGateway> = store.clone();
    (Coordinator::new(config, executor, gateway), store)
}

pub fn backup_task(sources: &[&str]) -> TaskDefinition {
    TaskDefinition::new(TaskKind::Backup).param("sources", sources.to_vec())
}

pub fn prune_task(keep_daily: u64) -> TaskDefinition {
    TaskDefinition::new(TaskKind::Prune).param("keep_daily", keep_daily)
}

pub fn cloud_sync_task(remote: &str) -> TaskDefinition {
    TaskDefinition::new(TaskKind::CloudSync).param("remote", remote)
}

pub fn notify_task(argv: &[&str]) -> TaskDefinition {
    TaskDefinition::new(TaskKind::Notify).param("argv", argv.to_vec())
}

pub fn command_task(argv: &[&str]) -> TaskDefinition {
    TaskDefinition::new(TaskKind::Command).param("argv", argv.to_vec())
}
