// src/config/validate.rs

use crate::config::model::{ConfigFile, EngineConfig, PipelineConfig, RawConfigFile};
use crate::errors::{EngineError, Result};
use crate::tasks::TaskRegistry;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = EngineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.pipeline))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_engine_config(&cfg.config)?;
    let registry = TaskRegistry::with_defaults();
    for (name, pipeline) in cfg.pipeline.iter() {
        validate_pipeline(name, pipeline, &registry)?;
    }
    Ok(())
}

/// Range checks for `[config]`. Enum-valued keys are already checked during
/// deserialization.
pub fn validate_engine_config(cfg: &EngineConfig) -> Result<()> {
    let at_least_one = [
        ("concurrency_limit", cfg.concurrency_limit as u64),
        ("output_line_retention", cfg.output_line_retention as u64),
        ("heartbeat_interval_seconds", cfg.heartbeat_interval_seconds),
        ("subscriber_buffer", cfg.subscriber_buffer as u64),
        ("starvation_threshold", u64::from(cfg.starvation_threshold)),
    ];
    for (key, value) in at_least_one {
        if value == 0 {
            return Err(EngineError::ConfigError(format!(
                "[config].{key} must be >= 1 (got 0)"
            )));
        }
    }

    if cfg.task_timeout_seconds == Some(0) {
        return Err(EngineError::ConfigError(
            "[config].task_timeout_seconds must be >= 1 when set".to_string(),
        ));
    }

    if cfg.persisted_output_lines > cfg.output_line_retention {
        return Err(EngineError::ConfigError(format!(
            "[config].persisted_output_lines ({}) cannot exceed output_line_retention ({})",
            cfg.persisted_output_lines, cfg.output_line_retention
        )));
    }

    for (key, value) in [
        ("borg_binary", &cfg.borg_binary),
        ("rclone_binary", &cfg.rclone_binary),
    ] {
        if value.trim().is_empty() {
            return Err(EngineError::ConfigError(format!(
                "[config].{key} must not be empty"
            )));
        }
    }

    Ok(())
}

fn validate_pipeline(name: &str, pipeline: &PipelineConfig, registry: &TaskRegistry) -> Result<()> {
    match (&pipeline.command, pipeline.tasks.is_empty()) {
        (Some(_), false) => {
            return Err(EngineError::ConfigError(format!(
                "pipeline '{name}' sets both `command` and `task` entries"
            )));
        }
        (None, true) => {
            return Err(EngineError::ConfigError(format!(
                "pipeline '{name}' needs either `command` or at least one [[pipeline.{name}.task]]"
            )));
        }
        _ => {}
    }

    let request = pipeline.to_request(name);
    for (index, def) in request.tasks.iter().enumerate() {
        registry
            .validate(def, request.repository.as_deref())
            .map_err(|err| {
                EngineError::ConfigError(format!("pipeline '{name}' task {index}: {err}"))
            })?;
    }
    Ok(())
}
