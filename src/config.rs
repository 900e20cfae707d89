//! Typed stack configuration.
//!
//! `StackConfig` is passed explicitly through resolve, estimate,
//! render and rollout. It touches the `.env` file only through
//! [`StackConfig::to_env`] and [`StackConfig::from_env`].

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::capacity::{CapacityInput, DEFAULT_REQUESTS_PER_MINUTE, ReplicaPlan};
use crate::cron::BackupSchedule;
use crate::digits;
use crate::envfile::EnvFile;
use crate::error::{DeployError, DeployResult};
use crate::role::DeploymentRole;
use crate::topology::{API_PORT, MAX_PUBLISHED_API_REPLICAS};

pub const DEFAULT_SNAPSHOT_RETENTION: usize = 3;
pub const GENERATED_SECRET_LEN: usize = 32;

/// Keys owned by [`StackConfig`]. Anything else found in an
/// existing `.env` is carried through untouched.
const KNOWN_KEYS: &[&str] = &[
    "COMPOSE_PROJECT_NAME",
    "COMPOSE_PROFILES",
    "DEPLOY_ROLE",
    "EDGE_ENABLED",
    "DOMAIN",
    "CLIENT_DOMAIN",
    "RABBITMQ_ADMIN_DOMAIN",
    "MINIO_CONSOLE_DOMAIN",
    "ACME_EMAIL",
    "REMOTE_DATA_HOST",
    "REMOTE_APP_HOST",
    "POSTGRES_HOST",
    "RABBITMQ_HOST",
    "REDIS_HOST",
    "MINIO_HOST",
    "DATA_BIND_ADDRESS",
    "APP_BIND_ADDRESS",
    "PEAK_ACTIVE_USERS",
    "REQUESTS_PER_MINUTE_PER_USER",
    "WEB_REPLICAS",
    "PROCESSOR_REPLICAS",
    "WORKER_REPLICAS",
    "POSTGRES_USER",
    "POSTGRES_PASSWORD",
    "POSTGRES_DB",
    "RABBITMQ_USER",
    "RABBITMQ_PASSWORD",
    "REDIS_PASSWORD",
    "MINIO_ROOT_USER",
    "MINIO_ROOT_PASSWORD",
    "JWT_SECRET",
    "API_IMAGE",
    "CLIENT_IMAGE",
    "PROCESSOR_IMAGE",
    "WORKER_IMAGE",
    "JOBS_IMAGE",
    "POSTGRES_IMAGE",
    "RABBITMQ_IMAGE",
    "REDIS_IMAGE",
    "MINIO_IMAGE",
    "CADDY_IMAGE",
    "SNAPSHOT_RETENTION",
    "BACKUP_SCHEDULE",
    "REGISTRY",
    "REGISTRY_USER",
];

/// Public hostnames served by the edge router.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Domains {
    pub primary: String,
    pub client: String,
    pub rabbitmq_admin: Option<String>,
    pub minio_console: Option<String>,
}

/// Credentials shared by the data services and the compute
/// services that connect to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,
    pub rabbitmq_user: String,
    pub rabbitmq_password: String,
    pub redis_password: String,
    pub minio_root_user: String,
    pub minio_root_password: String,
    pub jwt_secret: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            postgres_user: "app".to_string(),
            postgres_password: String::new(),
            postgres_db: "app".to_string(),
            rabbitmq_user: "app".to_string(),
            rabbitmq_password: String::new(),
            redis_password: String::new(),
            minio_root_user: "minio-admin".to_string(),
            minio_root_password: String::new(),
            jwt_secret: String::new(),
        }
    }
}

impl Credentials {
    fn fields(&self) -> [(&'static str, &str); 9] {
        [
            ("POSTGRES_USER", self.postgres_user.as_str()),
            ("POSTGRES_PASSWORD", self.postgres_password.as_str()),
            ("POSTGRES_DB", self.postgres_db.as_str()),
            ("RABBITMQ_USER", self.rabbitmq_user.as_str()),
            ("RABBITMQ_PASSWORD", self.rabbitmq_password.as_str()),
            ("REDIS_PASSWORD", self.redis_password.as_str()),
            ("MINIO_ROOT_USER", self.minio_root_user.as_str()),
            ("MINIO_ROOT_PASSWORD", self.minio_root_password.as_str()),
            ("JWT_SECRET", self.jwt_secret.as_str()),
        ]
    }

    fn secrets_mut(&mut self) -> [&mut String; 5] {
        [
            &mut self.postgres_password,
            &mut self.rabbitmq_password,
            &mut self.redis_password,
            &mut self.minio_root_password,
            &mut self.jwt_secret,
        ]
    }

    /// Generate every empty secret. Secrets that already have a
    /// value are left alone.
    pub fn fill_missing_secrets(&mut self, rng: &mut impl Rng) {
        for secret in self.secrets_mut() {
            if secret.is_empty() {
                *secret = generate_secret(rng, GENERATED_SECRET_LEN);
            }
        }
    }

    /// First empty or unsafe credential, as a required-field or
    /// input error.
    pub fn validate(&self) -> DeployResult<()> {
        for (key, value) in self.fields() {
            if value.is_empty() {
                return Err(DeployError::required(key));
            }
            if value
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '$' | '"' | '\'' | '#' | '\\'))
            {
                return Err(DeployError::InvalidInput(format!(
                    "{key} must not contain whitespace, quotes, '$', '#' or '\\'"
                )));
            }
        }
        Ok(())
    }
}

/// Random alphanumeric secret.
pub fn generate_secret(rng: &mut impl Rng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Image references for every service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Images {
    pub api: String,
    pub client: String,
    pub processor: String,
    pub worker: String,
    pub jobs: String,
    pub postgres: String,
    pub rabbitmq: String,
    pub redis: String,
    pub minio: String,
    pub caddy: String,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            api: "stack/api:latest".to_string(),
            client: "stack/client:latest".to_string(),
            processor: "stack/processor:latest".to_string(),
            worker: "stack/worker:latest".to_string(),
            jobs: "stack/jobs:latest".to_string(),
            postgres: "postgres:16-alpine".to_string(),
            rabbitmq: "rabbitmq:3.13-management-alpine".to_string(),
            redis: "redis:7-alpine".to_string(),
            minio: "minio/minio:latest".to_string(),
            caddy: "caddy:2-alpine".to_string(),
        }
    }
}

impl Images {
    fn entries(&self) -> [(&'static str, &str); 10] {
        [
            ("API_IMAGE", self.api.as_str()),
            ("CLIENT_IMAGE", self.client.as_str()),
            ("PROCESSOR_IMAGE", self.processor.as_str()),
            ("WORKER_IMAGE", self.worker.as_str()),
            ("JOBS_IMAGE", self.jobs.as_str()),
            ("POSTGRES_IMAGE", self.postgres.as_str()),
            ("RABBITMQ_IMAGE", self.rabbitmq.as_str()),
            ("REDIS_IMAGE", self.redis.as_str()),
            ("MINIO_IMAGE", self.minio.as_str()),
            ("CADDY_IMAGE", self.caddy.as_str()),
        ]
    }

    fn entries_mut(&mut self) -> [(&'static str, &mut String); 10] {
        [
            ("API_IMAGE", &mut self.api),
            ("CLIENT_IMAGE", &mut self.client),
            ("PROCESSOR_IMAGE", &mut self.processor),
            ("WORKER_IMAGE", &mut self.worker),
            ("JOBS_IMAGE", &mut self.jobs),
            ("POSTGRES_IMAGE", &mut self.postgres),
            ("RABBITMQ_IMAGE", &mut self.rabbitmq),
            ("REDIS_IMAGE", &mut self.redis),
            ("MINIO_IMAGE", &mut self.minio),
            ("CADDY_IMAGE", &mut self.caddy),
        ]
    }
}

/// Private registry the images are pulled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    pub host: String,
    pub user: String,
}

/// Everything needed to render and apply one node's stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    pub project: String,
    pub role: DeploymentRole,
    pub edge_override: Option<bool>,
    pub capacity: CapacityInput,
    pub replicas: ReplicaPlan,
    pub domains: Domains,
    pub acme_email: String,
    pub credentials: Credentials,
    pub images: Images,
    /// Address of the data node when data services run elsewhere.
    pub data_host: Option<String>,
    /// Address of the app node when compute runs elsewhere.
    pub app_host: Option<String>,
    pub snapshot_retention: usize,
    pub backup: Option<BackupSchedule>,
    pub registry: Option<Registry>,
    /// Unrecognised `.env` entries, written back verbatim.
    pub extra: EnvFile,
}

impl StackConfig {
    /// Configuration with the estimated replica plan and default
    /// credentials, images and retention.
    #[must_use]
    pub fn new(role: DeploymentRole, capacity: CapacityInput) -> Self {
        Self {
            project: "stack".to_string(),
            role,
            edge_override: None,
            capacity,
            replicas: capacity.estimate(),
            domains: Domains::default(),
            acme_email: String::new(),
            credentials: Credentials::default(),
            images: Images::default(),
            data_host: None,
            app_host: None,
            snapshot_retention: DEFAULT_SNAPSHOT_RETENTION,
            backup: None,
            registry: None,
            extra: EnvFile::new(),
        }
    }

    #[must_use]
    pub fn domain(mut self, primary: &str, client: &str) -> Self {
        self.domains.primary = primary.to_string();
        self.domains.client = client.to_string();
        self
    }

    #[must_use]
    pub fn acme_email(mut self, email: &str) -> Self {
        self.acme_email = email.to_string();
        self
    }

    #[must_use]
    pub const fn edge_override(mut self, enabled: bool) -> Self {
        self.edge_override = Some(enabled);
        self
    }

    #[must_use]
    pub fn data_host(mut self, host: &str) -> Self {
        self.data_host = Some(host.to_string());
        self
    }

    #[must_use]
    pub fn app_host(mut self, host: &str) -> Self {
        self.app_host = Some(host.to_string());
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub const fn runs_edge(&self) -> bool {
        self.role.runs_edge(self.edge_override)
    }

    #[must_use]
    pub const fn runs_compute(&self) -> bool {
        self.role.runs_compute()
    }

    #[must_use]
    pub const fn runs_data(&self) -> bool {
        self.role.runs_data()
    }

    /// Compose profiles enabled on this node, in document order.
    #[must_use]
    pub fn profiles(&self) -> Vec<&'static str> {
        let mut profiles = Vec::new();
        if self.runs_compute() {
            profiles.push("app");
        }
        if self.runs_data() {
            profiles.push("data");
        }
        if self.runs_edge() {
            profiles.push("edge");
        }
        profiles
    }

    /// Host at which compute services reach `service`.
    #[must_use]
    pub fn data_service_host<'a>(&'a self, service: &'a str) -> &'a str {
        if self.runs_data() {
            service
        } else {
            self.data_host.as_deref().unwrap_or(service)
        }
    }

    /// Host at which the edge router reaches a compute service.
    #[must_use]
    pub fn app_service_host<'a>(&'a self, service: &'a str) -> &'a str {
        if self.runs_compute() {
            service
        } else {
            self.app_host.as_deref().unwrap_or(service)
        }
    }

    fn admin_domains_set(&self) -> bool {
        self.domains.rabbitmq_admin.is_some() || self.domains.minio_console.is_some()
    }

    /// Check that every field this role needs is present.
    pub fn validate(&self) -> DeployResult<()> {
        let edge = self.runs_edge();
        let compute = self.runs_compute();
        let data = self.runs_data();

        if edge || compute {
            if self.domains.primary.trim().is_empty() {
                return Err(DeployError::required("DOMAIN"));
            }
            if self.domains.client.trim().is_empty() {
                return Err(DeployError::required("CLIENT_DOMAIN"));
            }
        }

        if edge {
            let email = self.acme_email.trim();
            if email.is_empty() {
                return Err(DeployError::required("ACME_EMAIL"));
            }
            if !email.contains('@') {
                return Err(DeployError::InvalidInput(format!(
                    "ACME_EMAIL '{email}' is not an email address"
                )));
            }
        }

        let needs_data_host = (compute && !data) || (edge && !data && self.admin_domains_set());
        if needs_data_host && is_blank(self.data_host.as_deref()) {
            return Err(DeployError::required("REMOTE_DATA_HOST"));
        }

        if edge && !compute && is_blank(self.app_host.as_deref()) {
            return Err(DeployError::required("REMOTE_APP_HOST"));
        }

        if self.project.is_empty() {
            return Err(DeployError::required("COMPOSE_PROJECT_NAME"));
        }

        if (compute || edge) && self.replicas.web > MAX_PUBLISHED_API_REPLICAS {
            return Err(DeployError::InvalidInput(format!(
                "WEB_REPLICAS {} needs more host ports than the \
                 {MAX_PUBLISHED_API_REPLICAS} available from {API_PORT}",
                self.replicas.web
            )));
        }

        if self.snapshot_retention == 0 {
            return Err(DeployError::InvalidInput(
                "SNAPSHOT_RETENTION must be at least 1".into(),
            ));
        }

        self.credentials.validate()
    }

    /// Serialize to the `.env` representation.
    ///
    /// Derived entries (`COMPOSE_PROFILES`, service hosts, bind
    /// addresses) are written for docker compose interpolation and
    /// recomputed on load.
    #[must_use]
    pub fn to_env(&self) -> EnvFile {
        let mut env = EnvFile::new();

        env.set("COMPOSE_PROJECT_NAME", &self.project);
        env.set("COMPOSE_PROFILES", self.profiles().join(","));
        env.set("DEPLOY_ROLE", self.role.as_str());
        env.set("EDGE_ENABLED", self.runs_edge().to_string());

        env.set("DOMAIN", &self.domains.primary);
        env.set("CLIENT_DOMAIN", &self.domains.client);
        env.set(
            "RABBITMQ_ADMIN_DOMAIN",
            self.domains.rabbitmq_admin.clone().unwrap_or_default(),
        );
        env.set(
            "MINIO_CONSOLE_DOMAIN",
            self.domains.minio_console.clone().unwrap_or_default(),
        );
        env.set("ACME_EMAIL", &self.acme_email);

        env.set("REMOTE_DATA_HOST", self.data_host.clone().unwrap_or_default());
        env.set("REMOTE_APP_HOST", self.app_host.clone().unwrap_or_default());
        for (key, service) in [
            ("POSTGRES_HOST", "postgres"),
            ("RABBITMQ_HOST", "rabbitmq"),
            ("REDIS_HOST", "redis"),
            ("MINIO_HOST", "minio"),
        ] {
            env.set(key, self.data_service_host(service));
        }
        env.set("DATA_BIND_ADDRESS", bind_address(self.runs_data() && !self.runs_compute()));
        env.set("APP_BIND_ADDRESS", bind_address(self.runs_compute() && !self.runs_edge()));

        env.set("PEAK_ACTIVE_USERS", self.capacity.peak_concurrent_users.to_string());
        env.set(
            "REQUESTS_PER_MINUTE_PER_USER",
            self.capacity.requests_per_minute_per_user.to_string(),
        );
        env.set("WEB_REPLICAS", self.replicas.web.to_string());
        env.set("PROCESSOR_REPLICAS", self.replicas.processor.to_string());
        env.set("WORKER_REPLICAS", self.replicas.worker.to_string());

        for (key, value) in self.credentials.fields() {
            env.set(key, value);
        }
        for (key, value) in self.images.entries() {
            env.set(key, value);
        }

        env.set("SNAPSHOT_RETENTION", self.snapshot_retention.to_string());
        env.set(
            "BACKUP_SCHEDULE",
            self.backup.map(|b| b.to_string()).unwrap_or_default(),
        );
        let (registry, registry_user) = self
            .registry
            .as_ref()
            .map(|r| (r.host.clone(), r.user.clone()))
            .unwrap_or_default();
        env.set("REGISTRY", registry);
        env.set("REGISTRY_USER", registry_user);

        env.merge_missing(&self.extra);
        env
    }

    /// Rebuild a configuration from a previously written `.env`.
    pub fn from_env(env: &EnvFile) -> DeployResult<Self> {
        let role: DeploymentRole = env
            .get_nonempty("DEPLOY_ROLE")
            .ok_or_else(|| DeployError::required("DEPLOY_ROLE"))?
            .parse()?;

        let peak = env
            .get_nonempty("PEAK_ACTIVE_USERS")
            .ok_or_else(|| DeployError::required("PEAK_ACTIVE_USERS"))?;
        let peak = parse_positive("PEAK_ACTIVE_USERS", peak)?;
        let rate = env
            .get_nonempty("REQUESTS_PER_MINUTE_PER_USER")
            .map(|v| parse_positive("REQUESTS_PER_MINUTE_PER_USER", v))
            .transpose()?
            .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE);
        let capacity = CapacityInput::new(peak, rate)?;

        let mut config = Self::new(role, capacity);

        let estimated = config.replicas;
        config.replicas = estimated.with_overrides(
            optional_number(env, "WEB_REPLICAS")?,
            optional_number(env, "PROCESSOR_REPLICAS")?,
            optional_number(env, "WORKER_REPLICAS")?,
        )?;

        if let Some(project) = env.get_nonempty("COMPOSE_PROJECT_NAME") {
            config.project = project.to_string();
        }
        config.edge_override = env
            .get_nonempty("EDGE_ENABLED")
            .map(|v| parse_bool("EDGE_ENABLED", v))
            .transpose()?;

        config.domains = Domains {
            primary: env.get("DOMAIN").unwrap_or_default().to_string(),
            client: env.get("CLIENT_DOMAIN").unwrap_or_default().to_string(),
            rabbitmq_admin: env.get_nonempty("RABBITMQ_ADMIN_DOMAIN").map(str::to_string),
            minio_console: env.get_nonempty("MINIO_CONSOLE_DOMAIN").map(str::to_string),
        };
        config.acme_email = env.get("ACME_EMAIL").unwrap_or_default().to_string();
        config.data_host = env.get_nonempty("REMOTE_DATA_HOST").map(str::to_string);
        config.app_host = env.get_nonempty("REMOTE_APP_HOST").map(str::to_string);

        let c = &mut config.credentials;
        for (key, slot) in [
            ("POSTGRES_USER", &mut c.postgres_user),
            ("POSTGRES_PASSWORD", &mut c.postgres_password),
            ("POSTGRES_DB", &mut c.postgres_db),
            ("RABBITMQ_USER", &mut c.rabbitmq_user),
            ("RABBITMQ_PASSWORD", &mut c.rabbitmq_password),
            ("REDIS_PASSWORD", &mut c.redis_password),
            ("MINIO_ROOT_USER", &mut c.minio_root_user),
            ("MINIO_ROOT_PASSWORD", &mut c.minio_root_password),
            ("JWT_SECRET", &mut c.jwt_secret),
        ] {
            if let Some(value) = env.get(key) {
                *slot = value.to_string();
            }
        }

        for (key, slot) in config.images.entries_mut() {
            if let Some(value) = env.get_nonempty(key) {
                *slot = value.to_string();
            }
        }

        if let Some(retention) = env.get_nonempty("SNAPSHOT_RETENTION") {
            let retention = parse_positive("SNAPSHOT_RETENTION", retention)?;
            config.snapshot_retention = usize::try_from(retention)
                .map_err(|_| DeployError::InvalidInput("SNAPSHOT_RETENTION is too large".into()))?;
        }
        config.backup = env
            .get_nonempty("BACKUP_SCHEDULE")
            .map(str::parse::<BackupSchedule>)
            .transpose()?;
        config.registry = env.get_nonempty("REGISTRY").map(|host| Registry {
            host: host.to_string(),
            user: env.get("REGISTRY_USER").unwrap_or_default().to_string(),
        });

        let mut extra = EnvFile::new();
        for key in env.keys().filter(|k| !KNOWN_KEYS.contains(k)) {
            extra.set(key, env.get(key).unwrap_or_default());
        }
        config.extra = extra;

        Ok(config)
    }
}

const fn bind_address(public: bool) -> &'static str {
    if public { "0.0.0.0" } else { "127.0.0.1" }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn parse_positive(key: &str, value: &str) -> DeployResult<u64> {
    digits::parse_in_range(value, &(1..=u64::MAX))
        .map_err(|e| DeployError::InvalidInput(format!("{key}: {e}")))
}

fn optional_number(env: &EnvFile, key: &str) -> DeployResult<Option<u64>> {
    env.get_nonempty(key)
        .map(|v| parse_positive(key, v))
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> DeployResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        other => Err(DeployError::InvalidInput(format!(
            "{key}: expected true or false, got '{other}'"
        ))),
    }
}
