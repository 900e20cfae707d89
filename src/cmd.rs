use std::path::Path;
use std::process::{Command, Output, Stdio};

use tracing::{debug, warn};

use crate::error::{DeployError, DeployResult};

/// Run a command in `dir` and capture its trimmed stdout. Fails
/// if the command returns a non-zero exit code.
pub fn run(dir: Option<&Path>, program: &str, args: &[&str]) -> DeployResult<String> {
    debug!(command = %format_command(program, args), "running");
    let output = build(dir, program, args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| spawn_error(program, e))?;

    check(program, args, &output)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command and hand back its raw output whatever the exit
/// status, for callers that tell failures apart by stderr.
pub fn output(dir: Option<&Path>, program: &str, args: &[&str]) -> DeployResult<Output> {
    debug!(command = %format_command(program, args), "running");
    build(dir, program, args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(program, e))
}

/// Run a command in `dir` with stdin/stdout/stderr inherited, so
/// progress output (image pulls) reaches the operator.
pub fn run_interactive(dir: Option<&Path>, program: &str, args: &[&str]) -> DeployResult<()> {
    debug!(command = %format_command(program, args), "running");
    let status = build(dir, program, args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| spawn_error(program, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(DeployError::CommandFailed {
            command: format_command(program, args),
            status,
        })
    }
}

/// Run a command in `dir` with `stdin_data` piped to its stdin.
/// Used for secrets so they never appear in the argument list.
pub fn run_with_stdin(
    dir: Option<&Path>,
    program: &str,
    args: &[&str],
    stdin_data: &[u8],
) -> DeployResult<String> {
    use std::io::Write;

    debug!(command = %format_command(program, args), "running with stdin");
    let mut child = build(dir, program, args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    if let Some(stdin) = &mut child.stdin {
        stdin.write_all(stdin_data)?;
    }
    drop(child.stdin.take());

    let output = child.wait_with_output()?;
    check(program, args, &output)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Check if a command exists on PATH.
#[must_use]
pub fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn build(dir: Option<&Path>, program: &str, args: &[&str]) -> Command {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    command
}

fn check(program: &str, args: &[&str], output: &Output) -> DeployResult<()> {
    if output.status.success() {
        return Ok(());
    }
    let command = format_command(program, args);
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    warn!(command = %command, stderr = %stderr, "command failed");
    Err(DeployError::CommandFailed {
        command,
        status: output.status,
    })
}

fn spawn_error(program: &str, e: std::io::Error) -> DeployError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DeployError::CommandNotFound(program.to_string())
    } else {
        DeployError::Io(e)
    }
}

#[must_use]
pub fn format_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|a| (*a).to_string()));
    parts.join(" ")
}
