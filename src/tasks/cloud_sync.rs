// src/tasks/cloud_sync.rs

//! Mirror a local repository to a cloud remote with `rclone sync`.
//!
//! A task without a `remote` is a no-op: pipelines can keep the step in
//! place on machines that have no cloud target configured.

use crate::errors::{EngineError, Result};
use crate::job::{TaskKind, TaskParams};
use crate::tasks::params::{bool_or, opt_str, opt_u64};
use crate::tasks::{Invocation, Planned, TaskHandler};

pub const NO_REMOTE_NOTE: &str = "no cloud remote configured; nothing to sync";

#[derive(Debug, Clone, Copy, Default)]
pub struct CloudSyncHandler;

fn source(params: &TaskParams, repository: Option<&str>) -> Result<Option<String>> {
    Ok(opt_str(params, "source")?.or_else(|| repository.map(str::to_string)))
}

impl TaskHandler for CloudSyncHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::CloudSync
    }

    fn validate(&self, params: &TaskParams, repository: Option<&str>) -> Result<()> {
        let remote = opt_str(params, "remote")?;
        if let Some(remote) = &remote {
            if !remote.contains(':') {
                return Err(EngineError::invalid_task(format!(
                    "remote `{remote}` must be in rclone `name:path` form"
                )));
            }
            if source(params, repository)?.is_none() {
                return Err(EngineError::invalid_task(
                    "no source: set `source` or a pipeline repository",
                ));
            }
        }
        opt_str(params, "bandwidth_limit")?;
        opt_u64(params, "transfers")?;
        bool_or(params, "dry_run", false)?;
        Ok(())
    }

    fn command(&self, inv: &Invocation) -> Result<Planned> {
        let p = &inv.params;
        let Some(remote) = opt_str(p, "remote")? else {
            return Ok(Planned::Skip(NO_REMOTE_NOTE.to_string()));
        };
        let source = source(p, inv.repository.as_deref())?
            .ok_or_else(|| EngineError::invalid_task("no source to sync"))?;

        let mut cmd = inv
            .base_command(&inv.tools.rclone)
            .args(["sync", source.as_str(), remote.as_str()])
            .args(["--stats", "10s", "--stats-one-line", "-v"]);
        if let Some(limit) = opt_str(p, "bandwidth_limit")? {
            cmd = cmd.args(["--bwlimit", limit.as_str()]);
        }
        if let Some(n) = opt_u64(p, "transfers")? {
            cmd = cmd.args(["--transfers".to_string(), n.to_string()]);
        }
        if bool_or(p, "dry_run", false)? {
            cmd = cmd.arg("--dry-run");
        }
        Ok(Planned::Run(cmd))
    }
}
