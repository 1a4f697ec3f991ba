// src/tasks/borg.rs

//! BorgBackup task kinds.
//!
//! Borg exit codes: 0 success, 1 warning (e.g. a file changed while being
//! read), 2 and above error. Warnings count as success.

use crate::errors::{EngineError, Result};
use crate::job::{TaskKind, TaskParams};
use crate::tasks::params::{bool_or, opt_str, opt_u64, str_list};
use crate::tasks::{ExitDisposition, Invocation, Planned, TaskHandler};

/// Archive name used when a backup task gives none. Borg expands the
/// placeholders itself.
pub const DEFAULT_ARCHIVE_NAME: &str = "{hostname}-{now}";

/// Prune retention rules, in the order they are passed to borg.
const KEEP_COUNTS: [(&str, &str); 7] = [
    ("keep_secondly", "--keep-secondly"),
    ("keep_minutely", "--keep-minutely"),
    ("keep_hourly", "--keep-hourly"),
    ("keep_daily", "--keep-daily"),
    ("keep_weekly", "--keep-weekly"),
    ("keep_monthly", "--keep-monthly"),
    ("keep_yearly", "--keep-yearly"),
];

fn borg_disposition(exit_code: i32) -> ExitDisposition {
    match exit_code {
        0 => ExitDisposition::Success,
        1 => ExitDisposition::Warning,
        _ => ExitDisposition::Failure,
    }
}

/// A `repository` parameter overrides the job's repository.
fn resolve_repository(params: &TaskParams, job_repository: Option<&str>) -> Result<String> {
    let repo = opt_str(params, "repository")?.or_else(|| job_repository.map(str::to_string));
    match repo {
        Some(r) if !r.trim().is_empty() => Ok(r),
        _ => Err(EngineError::invalid_task(
            "no repository: set one on the pipeline or as a task parameter",
        )),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackupHandler;

impl TaskHandler for BackupHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Backup
    }

    /// Pruning or syncing after a failed archive would act on stale data.
    fn critical(&self) -> bool {
        true
    }

    fn validate(&self, params: &TaskParams, repository: Option<&str>) -> Result<()> {
        resolve_repository(params, repository)?;
        if str_list(params, "sources")?.is_empty() {
            return Err(EngineError::invalid_task("`sources` must list at least one path"));
        }
        if let Some(archive) = opt_str(params, "archive")? {
            if archive.trim().is_empty() || archive.contains("::") {
                return Err(EngineError::invalid_task(format!(
                    "invalid archive name `{archive}`"
                )));
            }
        }
        str_list(params, "patterns")?;
        str_list(params, "exclude")?;
        opt_str(params, "compression")?;
        opt_str(params, "filter")?;
        bool_or(params, "dry_run", false)?;
        Ok(())
    }

    fn command(&self, inv: &Invocation) -> Result<Planned> {
        let p = &inv.params;
        let repo = resolve_repository(p, inv.repository.as_deref())?;
        let archive = opt_str(p, "archive")?.unwrap_or_else(|| DEFAULT_ARCHIVE_NAME.to_string());

        let mut cmd = inv.base_command(&inv.tools.borg).arg("create");
        if bool_or(p, "stats", true)? {
            cmd = cmd.arg("--stats");
        }
        if bool_or(p, "list", true)? {
            let filter = opt_str(p, "filter")?.unwrap_or_else(|| "AME".to_string());
            cmd = cmd.args(["--list", "--filter", filter.as_str()]);
        }
        if let Some(compression) = opt_str(p, "compression")? {
            cmd = cmd.args(["--compression", compression.as_str()]);
        }
        for pattern in str_list(p, "exclude")? {
            cmd = cmd.args(["--exclude", pattern.as_str()]);
        }
        for pattern in str_list(p, "patterns")? {
            cmd = cmd.arg(format!("--pattern={pattern}"));
        }
        if bool_or(p, "dry_run", false)? {
            cmd = cmd.arg("--dry-run");
        }
        cmd = cmd.arg(format!("{repo}::{archive}"));
        Ok(Planned::Run(cmd.args(str_list(p, "sources")?)))
    }

    fn disposition(&self, exit_code: i32, _params: &TaskParams) -> ExitDisposition {
        borg_disposition(exit_code)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneHandler;

impl TaskHandler for PruneHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Prune
    }

    fn validate(&self, params: &TaskParams, repository: Option<&str>) -> Result<()> {
        resolve_repository(params, repository)?;
        let mut rules = 0;
        if opt_str(params, "keep_within")?.is_some() {
            rules += 1;
        }
        for (key, _) in KEEP_COUNTS {
            if opt_u64(params, key)?.is_some() {
                rules += 1;
            }
        }
        if rules == 0 {
            return Err(EngineError::invalid_task(
                "at least one retention rule (keep_within, keep_daily, ...) is required",
            ));
        }
        for flag in ["save_space", "force", "dry_run", "stats", "list"] {
            bool_or(params, flag, false)?;
        }
        Ok(())
    }

    fn command(&self, inv: &Invocation) -> Result<Planned> {
        let p = &inv.params;
        let repo = resolve_repository(p, inv.repository.as_deref())?;

        let mut cmd = inv.base_command(&inv.tools.borg).arg("prune");
        if let Some(within) = opt_str(p, "keep_within")? {
            cmd = cmd.args(["--keep-within", within.as_str()]);
        }
        for (key, flag) in KEEP_COUNTS {
            if let Some(n) = opt_u64(p, key)? {
                cmd = cmd.args([flag.to_string(), n.to_string()]);
            }
        }
        if bool_or(p, "stats", true)? {
            cmd = cmd.arg("--stats");
        }
        if bool_or(p, "list", true)? {
            cmd = cmd.arg("--list");
        }
        if bool_or(p, "save_space", false)? {
            cmd = cmd.arg("--save-space");
        }
        if bool_or(p, "force", false)? {
            cmd = cmd.arg("--force");
        }
        if bool_or(p, "dry_run", false)? {
            cmd = cmd.arg("--dry-run");
        }
        Ok(Planned::Run(cmd.arg(repo)))
    }

    fn disposition(&self, exit_code: i32, _params: &TaskParams) -> ExitDisposition {
        borg_disposition(exit_code)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckHandler;

impl TaskHandler for CheckHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Check
    }

    fn validate(&self, params: &TaskParams, repository: Option<&str>) -> Result<()> {
        resolve_repository(params, repository)?;
        let repo_only = bool_or(params, "repository_only", false)?;
        let archives_only = bool_or(params, "archives_only", false)?;
        if repo_only && archives_only {
            return Err(EngineError::invalid_task(
                "`repository_only` and `archives_only` are mutually exclusive",
            ));
        }
        bool_or(params, "verify_data", false)?;
        opt_u64(params, "max_duration")?;
        Ok(())
    }

    fn command(&self, inv: &Invocation) -> Result<Planned> {
        let p = &inv.params;
        let repo = resolve_repository(p, inv.repository.as_deref())?;

        let mut cmd = inv.base_command(&inv.tools.borg).args(["check", "--progress"]);
        if bool_or(p, "repository_only", false)? {
            cmd = cmd.arg("--repository-only");
        }
        if bool_or(p, "archives_only", false)? {
            cmd = cmd.arg("--archives-only");
        }
        if bool_or(p, "verify_data", false)? {
            cmd = cmd.arg("--verify-data");
        }
        if let Some(secs) = opt_u64(p, "max_duration")? {
            cmd = cmd.args(["--max-duration".to_string(), secs.to_string()]);
        }
        Ok(Planned::Run(cmd.arg(repo)))
    }

    fn disposition(&self, exit_code: i32, _params: &TaskParams) -> ExitDisposition {
        borg_disposition(exit_code)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompactHandler;

impl TaskHandler for CompactHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Compact
    }

    fn validate(&self, params: &TaskParams, repository: Option<&str>) -> Result<()> {
        resolve_repository(params, repository)?;
        if let Some(threshold) = opt_u64(params, "threshold")? {
            if threshold > 99 {
                return Err(EngineError::invalid_task("`threshold` must be between 0 and 99"));
            }
        }
        Ok(())
    }

    fn command(&self, inv: &Invocation) -> Result<Planned> {
        let p = &inv.params;
        let repo = resolve_repository(p, inv.repository.as_deref())?;

        let mut cmd = inv.base_command(&inv.tools.borg).args(["compact", "--progress"]);
        if let Some(threshold) = opt_u64(p, "threshold")? {
            cmd = cmd.args(["--threshold".to_string(), threshold.to_string()]);
        }
        Ok(Planned::Run(cmd.arg(repo)))
    }

    fn disposition(&self, exit_code: i32, _params: &TaskParams) -> ExitDisposition {
        borg_disposition(exit_code)
    }
}

/// `borg break-lock <repository>`, used by recovery.
pub fn break_lock_command(borg: &str, repository: &str) -> crate::exec::CommandSpec {
    crate::exec::CommandSpec::new(borg).args(["break-lock", repository])
}
