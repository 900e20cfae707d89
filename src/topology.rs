//! The full service catalog for one node.
//!
//! Every service is always present in the document; the role only
//! decides which profiles are enabled. Connection settings are
//! compose interpolations (`${POSTGRES_HOST}`, ...) resolved from
//! `.env`, so the document itself carries no credentials.

use std::ops::RangeInclusive;

use crate::config::StackConfig;
use crate::service::{Profile, ServiceSpec};

pub const API_PORT: u16 = 8080;
pub const CLIENT_PORT: u16 = 3000;
pub const RABBITMQ_ADMIN_PORT: u16 = 15672;
pub const MINIO_CONSOLE_PORT: u16 = 9001;

/// Most API replicas whose host ports fit above [`API_PORT`].
pub const MAX_PUBLISHED_API_REPLICAS: u64 = (u16::MAX - API_PORT) as u64 + 1;

/// Host ports published for `web_replicas` API containers, one
/// each, starting at [`API_PORT`]. Saturates at the last port.
#[must_use]
pub fn api_host_ports(web_replicas: u64) -> RangeInclusive<u16> {
    let span = u16::try_from(web_replicas.saturating_sub(1)).unwrap_or(u16::MAX);
    API_PORT..=API_PORT.saturating_add(span)
}

/// Shared backend environment for the API and the background
/// services.
const BACKEND_ENV: &[(&str, &str)] = &[
    (
        "DATABASE_URL",
        "postgres://${POSTGRES_USER}:${POSTGRES_PASSWORD}@${POSTGRES_HOST}:5432/${POSTGRES_DB}",
    ),
    (
        "RABBITMQ_URL",
        "amqp://${RABBITMQ_USER}:${RABBITMQ_PASSWORD}@${RABBITMQ_HOST}:5672/",
    ),
    ("REDIS_URL", "redis://:${REDIS_PASSWORD}@${REDIS_HOST}:6379/0"),
    ("S3_ENDPOINT", "http://${MINIO_HOST}:9000"),
    ("S3_ACCESS_KEY", "${MINIO_ROOT_USER}"),
    ("S3_SECRET_KEY", "${MINIO_ROOT_PASSWORD}"),
    ("JWT_SECRET", "${JWT_SECRET}"),
    ("PUBLIC_URL", "https://${DOMAIN}"),
];

/// Health target polled after a rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTarget {
    pub service: String,
    pub has_probe: bool,
}

#[derive(Debug, Clone)]
pub struct Topology {
    pub services: Vec<ServiceSpec>,
    pub enabled: Vec<Profile>,
}

impl Topology {
    /// Build the catalog for `config`.
    #[must_use]
    pub fn plan(config: &StackConfig) -> Self {
        let mut services = compute_services(config);
        services.extend(data_services(config));
        services.push(edge_service(config));

        let mut enabled = Vec::new();
        if config.runs_compute() {
            enabled.push(Profile::App);
        }
        if config.runs_data() {
            enabled.push(Profile::Data);
        }
        if config.runs_edge() {
            enabled.push(Profile::Edge);
        }

        Self { services, enabled }
    }

    #[must_use]
    pub fn is_enabled(&self, profile: Profile) -> bool {
        self.enabled.contains(&profile)
    }

    /// Services whose profile is enabled on this node.
    pub fn enabled_services(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.iter().filter(|s| self.is_enabled(s.profile))
    }

    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    /// The service whose health decides whether a rollout on this
    /// node succeeded: the API if compute runs here, else Postgres,
    /// else the edge router.
    #[must_use]
    pub fn primary_health_target(&self) -> Option<HealthTarget> {
        let name = if self.is_enabled(Profile::App) {
            "api"
        } else if self.is_enabled(Profile::Data) {
            "postgres"
        } else if self.is_enabled(Profile::Edge) {
            "caddy"
        } else {
            return None;
        };
        self.service(name).map(|s| HealthTarget {
            service: s.name.clone(),
            has_probe: s.healthcheck.is_some(),
        })
    }
}

fn backend(name: &str, image: &str) -> ServiceSpec {
    BACKEND_ENV
        .iter()
        .fold(ServiceSpec::new(name, image, Profile::App), |svc, (k, v)| svc.env(k, v))
        .env("SERVICE_ROLE", name)
}

fn compute_services(config: &StackConfig) -> Vec<ServiceSpec> {
    let images = &config.images;
    let plan = &config.replicas;

    vec![
        backend("api", &images.api)
            .replicas(plan.web)
            .env("PORT", &API_PORT.to_string())
            .expose(API_PORT)
            .publish_range("APP_BIND_ADDRESS", api_host_ports(plan.web), API_PORT)
            .healthcheck(&format!("curl -fsS http://localhost:{API_PORT}/health || exit 1")),
        ServiceSpec::new("client", &images.client, Profile::App)
            .env("PORT", &CLIENT_PORT.to_string())
            .env("API_URL", "https://${DOMAIN}")
            .expose(CLIENT_PORT)
            .publish("APP_BIND_ADDRESS", CLIENT_PORT)
            .healthcheck(&format!(
                "wget -qO- http://localhost:{CLIENT_PORT}/ >/dev/null || exit 1"
            )),
        backend("processor", &images.processor).replicas(plan.processor),
        backend("worker", &images.worker).replicas(plan.worker),
        backend("jobs", &images.jobs),
    ]
}

fn data_services(config: &StackConfig) -> Vec<ServiceSpec> {
    let images = &config.images;

    vec![
        ServiceSpec::new("postgres", &images.postgres, Profile::Data)
            .env("POSTGRES_USER", "${POSTGRES_USER}")
            .env("POSTGRES_PASSWORD", "${POSTGRES_PASSWORD}")
            .env("POSTGRES_DB", "${POSTGRES_DB}")
            .volume("postgres-data", "/var/lib/postgresql/data")
            .expose(5432)
            .publish("DATA_BIND_ADDRESS", 5432)
            .healthcheck("pg_isready -U \"$${POSTGRES_USER}\" -d \"$${POSTGRES_DB}\""),
        ServiceSpec::new("rabbitmq", &images.rabbitmq, Profile::Data)
            .env("RABBITMQ_DEFAULT_USER", "${RABBITMQ_USER}")
            .env("RABBITMQ_DEFAULT_PASS", "${RABBITMQ_PASSWORD}")
            .volume("rabbitmq-data", "/var/lib/rabbitmq")
            .expose(5672)
            .expose(RABBITMQ_ADMIN_PORT)
            .publish("DATA_BIND_ADDRESS", 5672)
            .publish("DATA_BIND_ADDRESS", RABBITMQ_ADMIN_PORT)
            .healthcheck("rabbitmq-diagnostics -q ping"),
        ServiceSpec::new("redis", &images.redis, Profile::Data)
            .command("redis-server --appendonly yes --requirepass ${REDIS_PASSWORD}")
            .env("REDIS_PASSWORD", "${REDIS_PASSWORD}")
            .volume("redis-data", "/data")
            .expose(6379)
            .publish("DATA_BIND_ADDRESS", 6379)
            .healthcheck("redis-cli -a \"$${REDIS_PASSWORD}\" ping | grep -q PONG"),
        ServiceSpec::new("minio", &images.minio, Profile::Data)
            .command(&format!("server /data --console-address :{MINIO_CONSOLE_PORT}"))
            .env("MINIO_ROOT_USER", "${MINIO_ROOT_USER}")
            .env("MINIO_ROOT_PASSWORD", "${MINIO_ROOT_PASSWORD}")
            .volume("minio-data", "/data")
            .expose(9000)
            .expose(MINIO_CONSOLE_PORT)
            .publish("DATA_BIND_ADDRESS", 9000)
            .publish("DATA_BIND_ADDRESS", MINIO_CONSOLE_PORT)
            .healthcheck("mc ready local"),
    ]
}

fn edge_service(config: &StackConfig) -> ServiceSpec {
    ServiceSpec::new("caddy", &config.images.caddy, Profile::Edge)
        .port(80, 80)
        .port(443, 443)
        .volume("./Caddyfile", "/etc/caddy/Caddyfile:ro")
        .volume("caddy-data", "/data")
        .volume("caddy-config", "/config")
}
