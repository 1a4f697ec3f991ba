// src/tasks/notify.rs

//! Notification hook.
//!
//! Runs `argv` with the job outcome in its environment:
//!
//! - `BORGJOBS_JOB_ID`
//! - `BORGJOBS_JOB_OUTCOME` (`success` or `failure`, based on the tasks
//!   before this one)
//! - `BORGJOBS_TITLE` / `BORGJOBS_MESSAGE` when `title` / `message` are set
//!
//! `on_success` / `on_failure` (both default `true`) decide whether the hook
//! fires for that outcome at all.

use crate::errors::Result;
use crate::job::{TaskKind, TaskParams};
use crate::tasks::params::{argv, bool_or, opt_str};
use crate::tasks::{Invocation, Planned, TaskHandler};

#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyHandler;

impl TaskHandler for NotifyHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Notify
    }

    fn validate(&self, params: &TaskParams, _repository: Option<&str>) -> Result<()> {
        argv(params)?;
        bool_or(params, "on_success", true)?;
        bool_or(params, "on_failure", true)?;
        opt_str(params, "title")?;
        opt_str(params, "message")?;
        Ok(())
    }

    fn command(&self, inv: &Invocation) -> Result<Planned> {
        let p = &inv.params;
        let (outcome, wanted) = if inv.prior_failure {
            ("failure", bool_or(p, "on_failure", true)?)
        } else {
            ("success", bool_or(p, "on_success", true)?)
        };
        if !wanted {
            return Ok(Planned::Skip(format!(
                "notification disabled for {outcome} outcome"
            )));
        }

        let argv = argv(p)?;
        let mut cmd = inv
            .base_command(&argv[0])
            .args(argv[1..].iter().cloned())
            .env("BORGJOBS_JOB_ID", inv.job_id.to_string())
            .env("BORGJOBS_JOB_OUTCOME", outcome);
        if let Some(title) = opt_str(p, "title")? {
            cmd = cmd.env("BORGJOBS_TITLE", title);
        }
        if let Some(message) = opt_str(p, "message")? {
            cmd = cmd.env("BORGJOBS_MESSAGE", message);
        }
        Ok(Planned::Run(cmd))
    }
}
