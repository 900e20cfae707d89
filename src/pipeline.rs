//! Subcommand implementations.
//!
//! Each operation runs the stages in a fixed order: resolve the
//! role, estimate capacity, render, snapshot what is on disk, write
//! the new render, then apply and verify. Rendering validates the
//! configuration, so a missing required field aborts before any
//! file is touched.

use clap::Args;
use tracing::{error, info, warn};

use crate::capacity::{
    CapacityInput, DEFAULT_REQUESTS_PER_MINUTE, MIN_PROCESSOR_REPLICAS, MIN_WEB_REPLICAS,
    MIN_WORKER_REPLICAS, ReplicaPlan,
};
use crate::config::{Credentials, Registry, StackConfig, generate_secret, GENERATED_SECRET_LEN};
use crate::cron::{self, BackupSchedule};
use crate::envfile::EnvFile;
use crate::error::{DeployError, DeployResult};
use crate::prompt::Prompter;
use crate::render::{self, ArtifactKind, RenderedConfigSet};
use crate::role::{self, RoleChoice, TopologyPattern};
use crate::rollout::{HealthOutcome, RolloutDriver, RolloutSettings, Sleeper};
use crate::runtime::ContainerRuntime;
use crate::snapshot::{ArtifactSet, SnapshotManager};
use crate::topology::Topology;
use crate::workdir::Paths;

pub const DEFAULT_PEAK_USERS: u64 = 1000;
pub const MAX_PEAK_USERS: u64 = 100_000_000;
pub const MAX_REQUESTS_PER_MINUTE: u64 = 600;
pub const MAX_SNAPSHOT_RETENTION: u64 = 50;

#[derive(Debug, Clone, Default, Args)]
pub struct InstallOptions {
    /// Topology pattern
    #[arg(long, value_enum)]
    pub pattern: Option<TopologyPattern>,

    /// Role of this node within the pattern
    #[arg(long, value_enum)]
    pub role: Option<RoleChoice>,

    /// Run the edge router on a mixed-role node
    #[arg(long)]
    pub edge: Option<bool>,

    /// Primary (API) domain
    #[arg(long)]
    pub domain: Option<String>,

    /// Client app domain
    #[arg(long)]
    pub client_domain: Option<String>,

    /// Contact email for certificate issuance
    #[arg(long)]
    pub email: Option<String>,

    /// Address of the data node
    #[arg(long)]
    pub data_host: Option<String>,

    /// Address of the app node
    #[arg(long)]
    pub app_host: Option<String>,

    /// Expected peak concurrent active users
    #[arg(long)]
    pub peak_users: Option<u64>,

    /// Requests per minute per active user
    #[arg(long)]
    pub requests_per_minute: Option<u64>,

    /// Write configuration without starting containers
    #[arg(long)]
    pub skip_apply: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ScaleOptions {
    /// New expected peak concurrent active users
    #[arg(long)]
    pub peak_users: Option<u64>,

    /// Override the computed web replica count
    #[arg(long)]
    pub web: Option<u64>,

    /// Override the computed processor replica count
    #[arg(long)]
    pub processor: Option<u64>,

    /// Override the computed worker replica count
    #[arg(long)]
    pub worker: Option<u64>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct BackupOptions {
    /// Number of configuration snapshots to keep
    #[arg(long)]
    pub retention: Option<u64>,

    /// Daily database dump time, HH:MM
    #[arg(long)]
    pub at: Option<BackupSchedule>,

    /// Persist settings without touching the crontab
    #[arg(long)]
    pub skip_cron: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct LoginOptions {
    /// Registry host
    #[arg(long)]
    pub registry: Option<String>,

    /// Registry user
    #[arg(long)]
    pub user: Option<String>,

    /// Password or token; read from the environment, never a flag
    #[arg(skip)]
    pub password: Option<String>,
}

/// Runs subcommands against one working directory.
pub struct Pipeline<'a> {
    paths: Paths,
    prompter: &'a mut dyn Prompter,
    runtime: &'a dyn ContainerRuntime,
    sleeper: &'a dyn Sleeper,
    settings: RolloutSettings,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(
        paths: Paths,
        prompter: &'a mut dyn Prompter,
        runtime: &'a dyn ContainerRuntime,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            paths,
            prompter,
            runtime,
            sleeper,
            settings: RolloutSettings::default(),
        }
    }

    #[must_use]
    pub const fn settings(mut self, settings: RolloutSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub const fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Collect configuration, render, and bring the node up.
    pub fn install(&mut self, opts: &InstallOptions) -> DeployResult<StackConfig> {
        self.paths.ensure()?;
        let env_path = self.paths.env();
        let previous = match EnvFile::load(&env_path)? {
            Some(env) => Some(StackConfig::from_env(&env).inspect_err(|e| {
                error!(
                    path = %env_path.display(),
                    error = %e,
                    "existing configuration is invalid; fix it before reinstalling"
                );
            })?),
            None => None,
        };
        let prev = previous.as_ref();

        let pattern = match opts.pattern {
            Some(p) => p,
            None => {
                let labels: Vec<&str> = TopologyPattern::ALL.iter().map(|p| p.label()).collect();
                TopologyPattern::ALL[self.prompter.choose("Deployment pattern", &labels, 0)?]
            }
        };
        let choices = pattern.choices();
        let choice = match opts.role {
            Some(c) => c,
            None if choices.len() == 1 => choices[0],
            None => {
                let labels: Vec<&str> = choices.iter().map(|c| c.label()).collect();
                choices[self.prompter.choose("Role of this node", &labels, 0)?]
            }
        };
        let role = role::resolve(pattern, choice)?;
        info!(%pattern, %choice, %role, "resolved node role");

        let edge_override = if role.edge_policy().is_overridable() {
            let default = prev.is_none_or(StackConfig::runs_edge);
            Some(match opts.edge {
                Some(enabled) => enabled,
                None => self
                    .prompter
                    .confirm("Run the Caddy edge router on this node?", default)?,
            })
        } else {
            None
        };

        let capacity = if role.runs_compute() {
            self.ask_capacity(opts, prev.map(|p| p.capacity))?
        } else {
            match prev {
                Some(p) => p.capacity,
                None => CapacityInput::new(
                    opts.peak_users.unwrap_or(DEFAULT_PEAK_USERS),
                    opts.requests_per_minute.unwrap_or(DEFAULT_REQUESTS_PER_MINUTE),
                )?,
            }
        };

        let mut config = StackConfig::new(role, capacity);
        if let Some(p) = prev {
            config.project.clone_from(&p.project);
            config.images = p.images.clone();
            config.snapshot_retention = p.snapshot_retention;
            config.backup = p.backup;
            config.registry.clone_from(&p.registry);
            config.extra = p.extra.clone();
        }
        config.edge_override = edge_override;
        if role.runs_compute() {
            config.replicas = self.ask_replica_overrides(capacity.estimate())?;
        }

        self.collect_endpoints(&mut config, opts, prev)?;
        config.credentials =
            self.collect_credentials(prev.map(|p| &p.credentials), config.runs_data())?;
        if config.runs_compute() {
            self.collect_images(&mut config)?;
        }

        self.stage(&config)?;
        if opts.skip_apply {
            info!("configuration written; skipping container start");
        } else {
            self.converge(&config, true)?;
        }
        Ok(config)
    }

    /// Re-render from the persisted configuration, pull, converge.
    pub fn update(&mut self) -> DeployResult<StackConfig> {
        let config = self.load_config()?;
        self.stage(&config)?;
        self.converge(&config, true)?;
        Ok(config)
    }

    /// Re-estimate replicas for a new load figure and converge.
    pub fn scale(&mut self, opts: &ScaleOptions) -> DeployResult<StackConfig> {
        let mut config = self.load_config()?;

        if !config.runs_compute() {
            warn!(role = %config.role, "no scalable services on this node");
            return Ok(config);
        }

        let peak = match opts.peak_users {
            Some(users) => users,
            None => self.prompter.number(
                "Peak concurrent active users",
                1..=MAX_PEAK_USERS,
                Some(config.capacity.peak_concurrent_users),
            )?,
        };
        let capacity = CapacityInput::new(peak, config.capacity.requests_per_minute_per_user)?;
        let estimated = capacity.estimate();

        let replicas = if opts.web.is_some() || opts.processor.is_some() || opts.worker.is_some() {
            estimated.with_overrides(opts.web, opts.processor, opts.worker)?
        } else {
            self.ask_replica_overrides(estimated)?
        };

        info!(
            peak,
            web = replicas.web,
            processor = replicas.processor,
            worker = replicas.worker,
            "scaling"
        );
        config.capacity = capacity;
        config.replicas = replicas;

        self.stage(&config)?;
        self.converge(&config, false)?;
        Ok(config)
    }

    /// Set snapshot retention and, on nodes holding the database,
    /// install the daily dump schedule.
    pub fn backup_configure(&mut self, opts: &BackupOptions) -> DeployResult<StackConfig> {
        let mut config = self.load_config()?;

        let retention = match opts.retention {
            Some(r) => r,
            None => self.prompter.number(
                "Configuration snapshots to keep",
                1..=MAX_SNAPSHOT_RETENTION,
                u64::try_from(config.snapshot_retention).ok(),
            )?,
        };
        if !(1..=MAX_SNAPSHOT_RETENTION).contains(&retention) {
            return Err(DeployError::InvalidInput(format!(
                "retention must be between 1 and {MAX_SNAPSHOT_RETENTION}"
            )));
        }
        config.snapshot_retention = usize::try_from(retention)
            .map_err(|_| DeployError::InvalidInput("retention is too large".into()))?;

        let schedule = if config.runs_data() {
            let schedule = match opts.at {
                Some(at) => at,
                None => self.ask_schedule(config.backup)?,
            };
            config.backup = Some(schedule);
            Some(schedule)
        } else {
            info!(role = %config.role, "no database on this node, only retention is configured");
            None
        };

        self.stage(&config)?;
        let pruned =
            SnapshotManager::new(&self.paths.snapshots(), config.snapshot_retention).prune();
        if pruned > 0 {
            info!(pruned, "removed snapshots beyond the new retention");
        }

        if let Some(schedule) = schedule {
            if opts.skip_cron {
                info!(%schedule, "skipping crontab installation");
            } else {
                cron::install(&schedule, &self.paths.root)?;
            }
        }
        Ok(config)
    }

    /// Log in to the image registry, offering retry or skip on
    /// failure. Returns whether the login succeeded.
    pub fn registry_login(&mut self, opts: &LoginOptions) -> DeployResult<bool> {
        let mut config = if self.paths.env().is_file() {
            Some(self.load_config()?)
        } else {
            None
        };
        let previous = config.as_ref().and_then(|c| c.registry.clone());

        let host = match &opts.registry {
            Some(h) => h.clone(),
            None => self.prompter.text(
                "Registry",
                Some(previous.as_ref().map_or("ghcr.io", |r| r.host.as_str())),
            )?,
        };
        if host.trim().is_empty() {
            return Err(DeployError::required("REGISTRY"));
        }
        let user = match &opts.user {
            Some(u) => u.clone(),
            None => self
                .prompter
                .text("Registry user", previous.as_ref().map(|r| r.user.as_str()))?,
        };
        if user.trim().is_empty() {
            return Err(DeployError::required("REGISTRY_USER"));
        }
        let mut password = match &opts.password {
            Some(p) => p.clone(),
            None => self.prompter.secret("Registry password or token")?,
        };

        loop {
            if password.is_empty() {
                return Err(DeployError::required("registry password"));
            }
            match self.runtime.login(&host, &user, &password) {
                Ok(()) => break,
                Err(e) if self.prompter.is_interactive() => {
                    let options = ["Retry", "Skip"];
                    let label = format!("Registry login failed ({e}).");
                    if self.prompter.choose(&label, &options, 0)? == 1 {
                        warn!(registry = %host, "registry login skipped");
                        return Ok(false);
                    }
                    password = self.prompter.secret("Registry password or token")?;
                }
                Err(e) => return Err(e),
            }
        }
        info!(registry = %host, user = %user, "logged in to registry");

        if let Some(config) = config.as_mut() {
            config.registry = Some(Registry { host, user });
            self.stage(config)?;
        }
        Ok(true)
    }

    /// Sequentially restart the replicas of one service.
    pub fn restart(&self, service: &str) -> DeployResult<usize> {
        self.driver().gentle_restart(service)
    }

    /// Render from the persisted configuration and print it
    /// without writing or applying anything.
    pub fn plan(&self) -> DeployResult<RenderedConfigSet> {
        let config = self.load_config()?;
        let rendered = render::render(&config)?;

        eprintln!("=== Plan: no changes will be made ===");
        eprintln!();
        eprintln!("Role: {} (profiles: {})", config.role, config.profiles().join(","));
        eprintln!("{}", describe_replicas(&config.replicas));
        eprintln!();

        for kind in ArtifactKind::ALL {
            if let Some(content) = rendered.get(kind) {
                eprintln!("--- {kind} ---");
                println!("{content}");
            }
        }

        Ok(rendered)
    }

    fn driver(&self) -> RolloutDriver<'_> {
        RolloutDriver::new(self.runtime, self.sleeper, self.settings)
    }

    fn load_config(&self) -> DeployResult<StackConfig> {
        self.paths.require_installed()?;
        let env = EnvFile::load(&self.paths.env())?
            .ok_or_else(|| DeployError::FileNotFound(self.paths.env().display().to_string()))?;
        StackConfig::from_env(&env)
    }

    /// Render, snapshot whatever is on disk if it changed, then
    /// overwrite it with the new render.
    fn stage(&self, config: &StackConfig) -> DeployResult<RenderedConfigSet> {
        let rendered = render::render(config)?;

        let manager = SnapshotManager::new(&self.paths.snapshots(), config.snapshot_retention);
        let snapshot = ArtifactSet::read_from(&self.paths.root)
            .and_then(|current| manager.maybe_snapshot(&current));
        if let Err(e) = snapshot {
            warn!(error = %e, "could not snapshot previous configuration, continuing");
        }

        rendered.write_to(&self.paths.root)?;
        Ok(rendered)
    }

    fn converge(&self, config: &StackConfig, pull: bool) -> DeployResult<Option<HealthOutcome>> {
        let driver = self.driver();
        driver.apply(pull)?;

        let outcome = Topology::plan(config)
            .primary_health_target()
            .map(|target| driver.wait_healthy(&target));
        if let Some(HealthOutcome::Healthy { .. }) = outcome {
            info!(role = %config.role, "deployment complete");
        }
        Ok(outcome)
    }

    fn ask_capacity(
        &mut self,
        opts: &InstallOptions,
        previous: Option<CapacityInput>,
    ) -> DeployResult<CapacityInput> {
        let peak = match opts.peak_users {
            Some(p) => p,
            None => self.prompter.number(
                "Peak concurrent active users",
                1..=MAX_PEAK_USERS,
                Some(previous.map_or(DEFAULT_PEAK_USERS, |c| c.peak_concurrent_users)),
            )?,
        };
        let rate = match opts.requests_per_minute {
            Some(r) => r,
            None => self.prompter.number(
                "Requests per minute per active user",
                1..=MAX_REQUESTS_PER_MINUTE,
                Some(previous.map_or(DEFAULT_REQUESTS_PER_MINUTE, |c| {
                    c.requests_per_minute_per_user
                })),
            )?,
        };
        CapacityInput::new(peak, rate)
    }

    fn ask_replica_overrides(&mut self, estimated: ReplicaPlan) -> DeployResult<ReplicaPlan> {
        eprintln!("{}", describe_replicas(&estimated));
        if !self.prompter.confirm("Adjust replica counts?", false)? {
            return Ok(estimated);
        }

        let web = self
            .prompter
            .number("Web replicas", MIN_WEB_REPLICAS..=u64::MAX, Some(estimated.web))?;
        let processor = self.prompter.number(
            "Processor replicas",
            MIN_PROCESSOR_REPLICAS..=u64::MAX,
            Some(estimated.processor),
        )?;
        let worker = self.prompter.number(
            "Worker replicas",
            MIN_WORKER_REPLICAS..=u64::MAX,
            Some(estimated.worker),
        )?;
        ReplicaPlan::new(web, processor, worker)
    }

    fn ask_schedule(&mut self, previous: Option<BackupSchedule>) -> DeployResult<BackupSchedule> {
        let previous = previous.unwrap_or(BackupSchedule { hour: 3, minute: 0 });
        let hour = self
            .prompter
            .number("Daily backup hour (0-23)", 0..=23, Some(u64::from(previous.hour)))?;
        let minute = self
            .prompter
            .number("Daily backup minute (0-59)", 0..=59, Some(u64::from(previous.minute)))?;
        let narrow = |v: u64| {
            u8::try_from(v)
                .map_err(|_| DeployError::InvalidInput(format!("{v} is not a valid time")))
        };
        BackupSchedule::new(narrow(hour)?, narrow(minute)?)
    }

    fn ask(
        &mut self,
        preset: Option<&str>,
        label: &str,
        default: Option<&str>,
    ) -> DeployResult<String> {
        match preset {
            Some(value) => Ok(value.to_string()),
            None => Ok(self.prompter.text(label, default)?.trim().to_string()),
        }
    }

    fn collect_endpoints(
        &mut self,
        config: &mut StackConfig,
        opts: &InstallOptions,
        prev: Option<&StackConfig>,
    ) -> DeployResult<()> {
        let edge = config.runs_edge();
        let compute = config.runs_compute();
        let data = config.runs_data();

        if edge || compute {
            let primary = self.ask(
                opts.domain.as_deref(),
                "Primary domain (API)",
                prev.map(|p| p.domains.primary.as_str()),
            )?;
            let client_default = prev
                .map(|p| p.domains.client.clone())
                .filter(|c| !c.is_empty())
                .or_else(|| (!primary.is_empty()).then(|| format!("app.{primary}")));
            let client = self.ask(
                opts.client_domain.as_deref(),
                "Client app domain",
                client_default.as_deref(),
            )?;
            config.domains.primary = primary;
            config.domains.client = client;
        }

        if edge {
            config.acme_email = self.ask(
                opts.email.as_deref(),
                "Email for Let's Encrypt",
                prev.map(|p| p.acme_email.as_str()),
            )?;
            let rabbitmq = self.ask(
                None,
                "RabbitMQ admin domain (blank to skip)",
                prev.and_then(|p| p.domains.rabbitmq_admin.as_deref()),
            )?;
            let minio = self.ask(
                None,
                "MinIO console domain (blank to skip)",
                prev.and_then(|p| p.domains.minio_console.as_deref()),
            )?;
            config.domains.rabbitmq_admin = Some(rabbitmq).filter(|d| !d.is_empty());
            config.domains.minio_console = Some(minio).filter(|d| !d.is_empty());
        }

        let admin_routes =
            config.domains.rabbitmq_admin.is_some() || config.domains.minio_console.is_some();
        if (compute || (edge && admin_routes)) && !data {
            let host = self.ask(
                opts.data_host.as_deref(),
                "Address of the data node",
                prev.and_then(|p| p.data_host.as_deref()),
            )?;
            config.data_host = Some(host).filter(|h| !h.is_empty());
        }

        if edge && !compute {
            let host = self.ask(
                opts.app_host.as_deref(),
                "Address of the app node",
                prev.and_then(|p| p.app_host.as_deref()),
            )?;
            config.app_host = Some(host).filter(|h| !h.is_empty());
        }

        Ok(())
    }

    /// Reuse persisted credentials, prompt for missing ones, and
    /// generate what is still blank. Data passwords are generated
    /// only on the node that owns the data services; other nodes
    /// must be given the same values.
    fn collect_credentials(
        &mut self,
        previous: Option<&Credentials>,
        owns_data: bool,
    ) -> DeployResult<Credentials> {
        let mut creds = previous.cloned().unwrap_or_default();

        if previous.is_none() {
            creds.postgres_user =
                self.ask(None, "Postgres user", Some(creds.postgres_user.as_str()))?;
            creds.postgres_db =
                self.ask(None, "Postgres database", Some(creds.postgres_db.as_str()))?;
            creds.rabbitmq_user =
                self.ask(None, "RabbitMQ user", Some(creds.rabbitmq_user.as_str()))?;
            creds.minio_root_user =
                self.ask(None, "MinIO root user", Some(creds.minio_root_user.as_str()))?;
        }

        let hint = if owns_data { " (blank to generate)" } else { "" };
        for (label, slot) in [
            ("Postgres password", &mut creds.postgres_password),
            ("RabbitMQ password", &mut creds.rabbitmq_password),
            ("Redis password", &mut creds.redis_password),
            ("MinIO root password", &mut creds.minio_root_password),
        ] {
            if slot.is_empty() {
                *slot = self.prompter.secret(&format!("{label}{hint}"))?.trim().to_string();
            }
        }

        let mut rng = rand::thread_rng();
        if owns_data {
            creds.fill_missing_secrets(&mut rng);
        } else if creds.jwt_secret.is_empty() {
            creds.jwt_secret = generate_secret(&mut rng, GENERATED_SECRET_LEN);
        }
        Ok(creds)
    }

    fn collect_images(&mut self, config: &mut StackConfig) -> DeployResult<()> {
        let images = &mut config.images;
        for (label, slot) in [
            ("API image", &mut images.api),
            ("Client image", &mut images.client),
            ("Processor image", &mut images.processor),
            ("Worker image", &mut images.worker),
            ("Jobs image", &mut images.jobs),
        ] {
            let answer = self.prompter.text(label, Some(slot.as_str()))?;
            if !answer.trim().is_empty() {
                *slot = answer.trim().to_string();
            }
        }
        Ok(())
    }
}

fn describe_replicas(plan: &ReplicaPlan) -> String {
    format!(
        "Replicas: web={} processor={} worker={}",
        plan.web, plan.processor, plan.worker
    )
}
