//! Narrow interface to the container runtime, and its
//! `docker compose` implementation.

use std::path::{Path, PathBuf};

use crate::cmd;
use crate::error::{DeployError, DeployResult};

/// What the rollout driver needs from a container runtime.
pub trait ContainerRuntime {
    /// Pull the images of every enabled service.
    fn pull(&self) -> DeployResult<()>;

    /// Converge running containers to the declared topology.
    fn up(&self) -> DeployResult<()>;

    /// IDs of the running containers of `service`.
    fn instances(&self, service: &str) -> DeployResult<Vec<String>>;

    /// Restart a single container.
    fn restart_instance(&self, id: &str) -> DeployResult<()>;

    /// Health status string of each container of `service`:
    /// `healthy`, `unhealthy` or `starting` when a probe is
    /// declared, otherwise the container state (`running`, ...).
    fn health(&self, service: &str) -> DeployResult<Vec<String>>;

    /// Log in to an image registry.
    fn login(&self, registry: &str, user: &str, password: &str) -> DeployResult<()>;
}

/// Drives `docker compose` in a project directory holding the
/// rendered `docker-compose.yml` and `.env`.
pub struct DockerCompose {
    dir: PathBuf,
}

impl DockerCompose {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Fail early when docker or the compose plugin is missing.
    pub fn check_prerequisites() -> DeployResult<()> {
        if !cmd::command_exists("docker") {
            return Err(DeployError::CommandNotFound("docker".into()));
        }
        cmd::run(None, "docker", &["compose", "version"]).map(drop)
    }

    fn compose(&self, args: &[&str]) -> DeployResult<String> {
        let mut full = vec!["compose"];
        full.extend_from_slice(args);
        cmd::run(Some(&self.dir), "docker", &full)
    }

    fn compose_interactive(&self, args: &[&str]) -> DeployResult<()> {
        let mut full = vec!["compose"];
        full.extend_from_slice(args);
        cmd::run_interactive(Some(&self.dir), "docker", &full)
    }
}

impl ContainerRuntime for DockerCompose {
    fn pull(&self) -> DeployResult<()> {
        self.compose_interactive(&["pull"])
    }

    fn up(&self) -> DeployResult<()> {
        self.compose_interactive(&["up", "-d", "--remove-orphans"])
    }

    fn instances(&self, service: &str) -> DeployResult<Vec<String>> {
        let out = self.compose(&["ps", "-q", "--status", "running", service])?;
        Ok(parse_lines(&out))
    }

    fn restart_instance(&self, id: &str) -> DeployResult<()> {
        cmd::run(Some(&self.dir), "docker", &["restart", id]).map(drop)
    }

    fn health(&self, service: &str) -> DeployResult<Vec<String>> {
        let ids = self.compose(&["ps", "-q", service])?;
        let ids = parse_lines(&ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec![
            "inspect",
            "--format",
            "{{if .State.Health}}{{.State.Health.Status}}{{else}}{{.State.Status}}{{end}}",
        ];
        args.extend(ids.iter().map(String::as_str));
        let out = cmd::run(Some(&self.dir), "docker", &args)?;
        Ok(parse_lines(&out))
    }

    fn login(&self, registry: &str, user: &str, password: &str) -> DeployResult<()> {
        cmd::run_with_stdin(
            Some(&self.dir),
            "docker",
            &["login", registry, "-u", user, "--password-stdin"],
            password.as_bytes(),
        )
        .map(drop)
        .map_err(|e| DeployError::RegistryLogin(format!("{registry}: {e}")))
    }
}

fn parse_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lines_skips_blanks() {
        assert_eq!(parse_lines("abc\n\n  def  \n"), vec!["abc", "def"]);
        assert!(parse_lines("").is_empty());
    }
}
