//! Scheduled database dumps installed into the user's crontab.
//!
//! The entry is tagged with a marker comment naming the working
//! directory, so re-running `backup-configure` replaces the line
//! rather than appending another.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::{info, warn};

use crate::cmd;
use crate::error::{DeployError, DeployResult};

/// Daily time of the database dump, server local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupSchedule {
    pub hour: u8,
    pub minute: u8,
}

impl BackupSchedule {
    pub fn new(hour: u8, minute: u8) -> DeployResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(DeployError::InvalidInput(format!(
                "backup time {hour:02}:{minute:02} is not a valid time of day"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// The crontab line for this schedule. `%` is escaped because
    /// cron treats a bare `%` as a newline.
    #[must_use]
    pub fn cron_line(&self, workdir: &Path) -> String {
        let dir = shell_quote(&workdir.display().to_string()).replace('%', "\\%");
        format!(
            "{minute} {hour} * * * cd {dir} && mkdir -p backups && \
             docker compose exec -T postgres sh -c 'pg_dumpall -U \"$POSTGRES_USER\"' \
             > backups/db-$(date +\\%Y\\%m\\%d-\\%H\\%M).sql {marker}",
            minute = self.minute,
            hour = self.hour,
            marker = marker(workdir),
        )
    }
}

impl fmt::Display for BackupSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for BackupSchedule {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DeployError::InvalidInput(format!("backup schedule '{s}' is not HH:MM"));

        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

/// Single-quote `value` for `sh`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Marker comment identifying the entry owned by `workdir`.
#[must_use]
pub fn marker(workdir: &Path) -> String {
    format!("# stackpilot-backup:{}", workdir.display()).replace('%', "\\%")
}

/// Replace every line tagged with `marker` by `line`, or append
/// `line` if none is tagged.
#[must_use]
pub fn merge_crontab(existing: &str, marker: &str, line: &str) -> String {
    let mut lines: Vec<&str> = existing
        .lines()
        .filter(|l| !l.trim_end().ends_with(marker))
        .collect();
    lines.push(line);

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Whether `crontab -l` failed only because the user has no
/// crontab yet.
fn is_missing_crontab(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("no crontab for")
}

fn current_crontab() -> DeployResult<String> {
    let output = cmd::output(None, "crontab", &["-l"])?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if is_missing_crontab(&stderr) {
        return Ok(String::new());
    }
    warn!(stderr = %stderr.trim(), "could not read the current crontab");
    Err(DeployError::CommandFailed {
        command: cmd::format_command("crontab", &["-l"]),
        status: output.status,
    })
}

/// Install the dump schedule for `workdir` into the crontab.
pub fn install(schedule: &BackupSchedule, workdir: &Path) -> DeployResult<()> {
    let existing = current_crontab()?;
    let merged = merge_crontab(&existing, &marker(workdir), &schedule.cron_line(workdir));

    cmd::run_with_stdin(None, "crontab", &["-"], merged.as_bytes())?;
    info!(schedule = %schedule, workdir = %workdir.display(), "installed backup schedule");
    Ok(())
}
