use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::error::DeployResult;
use crate::pipeline::{BackupOptions, InstallOptions, LoginOptions, Pipeline, ScaleOptions};
use crate::prompt::{Console, Prompter, Terminal, Unattended};
use crate::rollout::{RolloutSettings, ThreadSleeper};
use crate::runtime::DockerCompose;
use crate::workdir::{self, Paths, WORKDIR_ENV};

/// Registry password for non-interactive `registry-login`.
pub const REGISTRY_PASSWORD_ENV: &str = "STACKPILOT_REGISTRY_PASSWORD";

#[derive(Debug, Parser)]
#[command(name = "stackpilot")]
#[command(about = "Plan, render and roll out a multi-node container stack")]
#[command(version)]
pub struct Cli {
    /// Directory holding the generated configuration
    #[arg(long, global = true)]
    pub workdir: Option<PathBuf>,

    /// Never prompt; use flags, persisted values and defaults
    #[arg(long, global = true)]
    pub non_interactive: bool,

    /// Seconds to wait between restarting consecutive replicas
    #[arg(long, global = true, default_value_t = 2)]
    pub settle_secs: u64,

    /// Seconds between health checks after a rollout
    #[arg(long, global = true, default_value_t = 5)]
    pub health_interval_secs: u64,

    /// Health checks before giving up on a service
    #[arg(long, global = true, default_value_t = 30)]
    pub health_attempts: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure this node and start its services
    Install(InstallOptions),

    /// Re-render from the saved configuration, pull and restart
    Update,

    /// Re-estimate replicas for a new load figure
    Scale(ScaleOptions),

    /// Set snapshot retention and the daily database backup
    BackupConfigure(BackupOptions),

    /// Log in to the container image registry
    RegistryLogin(LoginOptions),

    /// Restart the replicas of a service one at a time
    Restart {
        /// Service name, e.g. `api`
        service: String,
    },

    /// Print the files that would be generated
    Plan,
}

impl Cli {
    #[must_use]
    pub const fn settings(&self) -> RolloutSettings {
        RolloutSettings {
            settle_delay: Duration::from_secs(self.settle_secs),
            health_interval: Duration::from_secs(self.health_interval_secs),
            health_attempts: self.health_attempts,
        }
    }

    const fn needs_runtime(&self) -> bool {
        match &self.command {
            Command::Install(opts) => !opts.skip_apply,
            Command::Update
            | Command::Scale(_)
            | Command::RegistryLogin(_)
            | Command::Restart { .. } => true,
            Command::BackupConfigure(_) | Command::Plan => false,
        }
    }
}

/// Parse arguments and run the chosen subcommand.
pub fn run() -> DeployResult<()> {
    execute(Cli::parse())
}

pub fn execute(cli: Cli) -> DeployResult<()> {
    let mut console;
    let mut terminal = Terminal;
    let mut unattended = Unattended;
    let prompter: &mut dyn Prompter = if cli.non_interactive {
        &mut unattended
    } else if std::io::stdin().is_terminal() {
        &mut terminal
    } else {
        console = Console::stdio();
        &mut console
    };

    let dir = workdir::resolve(cli.workdir.clone(), std::env::var(WORKDIR_ENV).ok(), prompter)?;
    debug!(workdir = %dir.display(), "resolved working directory");

    if cli.needs_runtime() {
        DockerCompose::check_prerequisites()?;
    }

    let runtime = DockerCompose::new(&dir);
    let sleeper = ThreadSleeper;
    let mut pipeline =
        Pipeline::new(Paths::new(&dir), prompter, &runtime, &sleeper).settings(cli.settings());

    match cli.command {
        Command::Install(opts) => pipeline.install(&opts).map(drop),
        Command::Update => pipeline.update().map(drop),
        Command::Scale(opts) => pipeline.scale(&opts).map(drop),
        Command::BackupConfigure(opts) => pipeline.backup_configure(&opts).map(drop),
        Command::RegistryLogin(mut opts) => {
            opts.password = std::env::var(REGISTRY_PASSWORD_ENV)
                .ok()
                .filter(|p| !p.is_empty());
            pipeline.registry_login(&opts).map(drop)
        }
        Command::Restart { service } => pipeline.restart(&service).map(drop),
        Command::Plan => pipeline.plan().map(drop),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{RoleChoice, TopologyPattern};
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_install_presets() {
        let cli = Cli::try_parse_from([
            "stackpilot",
            "--non-interactive",
            "install",
            "--pattern",
            "three-node",
            "--role",
            "data",
            "--peak-users",
            "5000",
        ])
        .unwrap();

        assert!(cli.non_interactive);
        let Command::Install(opts) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(opts.pattern, Some(TopologyPattern::ThreeNode));
        assert_eq!(opts.role, Some(RoleChoice::Data));
        assert_eq!(opts.peak_users, Some(5000));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stackpilot",
            "restart",
            "api",
            "--settle-secs",
            "0",
            "--health-attempts",
            "3",
        ])
        .unwrap();

        let settings = cli.settings();
        assert_eq!(settings.settle_delay, Duration::ZERO);
        assert_eq!(settings.health_attempts, 3);
    }

    #[test]
    fn backup_time_parses() {
        let cli =
            Cli::try_parse_from(["stackpilot", "backup-configure", "--at", "02:30"]).unwrap();
        let Command::BackupConfigure(opts) = cli.command else {
            panic!("expected backup-configure");
        };
        assert_eq!(opts.at.map(|s| (s.hour, s.minute)), Some((2, 30)));
    }

    #[test]
    fn bad_backup_time_rejected() {
        assert!(Cli::try_parse_from(["stackpilot", "backup-configure", "--at", "25:00"]).is_err());
    }
}
