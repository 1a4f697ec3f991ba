// src/tasks/command.rs

use crate::errors::{EngineError, Result};
use crate::job::{TaskKind, TaskParams};
use crate::tasks::params::{argv, int_list};
use crate::tasks::{ExitDisposition, Invocation, Planned, TaskHandler};

/// Runs `argv` as-is. `success_codes` (default `[0]`) lists the exit codes
/// that count as success.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandHandler;

impl TaskHandler for CommandHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Command
    }

    fn validate(&self, params: &TaskParams, _repository: Option<&str>) -> Result<()> {
        argv(params)?;
        if params.contains_key("success_codes") && int_list(params, "success_codes")?.is_empty() {
            return Err(EngineError::invalid_task("`success_codes` must not be empty"));
        }
        Ok(())
    }

    fn command(&self, inv: &Invocation) -> Result<Planned> {
        let argv = argv(&inv.params)?;
        Ok(Planned::Run(
            inv.base_command(&argv[0]).args(argv[1..].iter().cloned()),
        ))
    }

    fn disposition(&self, exit_code: i32, params: &TaskParams) -> ExitDisposition {
        let codes = int_list(params, "success_codes").unwrap_or_default();
        let ok = if codes.is_empty() {
            exit_code == 0
        } else {
            codes.contains(&exit_code)
        };
        if ok {
            ExitDisposition::Success
        } else {
            ExitDisposition::Failure
        }
    }
}
