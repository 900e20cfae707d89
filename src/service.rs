use std::fmt;
use std::ops::RangeInclusive;

/// Enablement group a service belongs to. Compose activates a
/// group when its name is listed in `COMPOSE_PROFILES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Stateless compute: API, client, processor, worker, jobs.
    App,
    /// Stateful dependencies: Postgres, RabbitMQ, Redis, MinIO.
    Data,
    /// The Caddy edge router.
    Edge,
}

impl Profile {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Data => "data",
            Self::Edge => "edge",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One service of the topology document: image, replica count,
/// profile, environment, volumes, ports and health probe.
///
/// # Example
///
/// ```
/// use stackpilot::service::{Profile, ServiceSpec};
///
/// let api = ServiceSpec::new("api", "stack/api:latest", Profile::App)
///     .replicas(4)
///     .env("PORT", "8080")
///     .healthcheck("curl -f http://localhost:8080/health")
///     .expose(8080);
///
/// assert_eq!(api.upstream(), "api:8080");
/// assert_eq!(api.replicas, Some(4));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub profile: Profile,
    /// `None` for singleton services.
    pub replicas: Option<u64>,
    pub command: Option<String>,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<(String, String)>,
    pub expose: Vec<u16>,
    /// Published ports as `bind:host:container` strings.
    pub ports: Vec<String>,
    pub healthcheck: Option<String>,
}

impl ServiceSpec {
    #[must_use]
    pub fn new(name: &str, image: &str, profile: Profile) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            profile,
            replicas: None,
            command: None,
            env: Vec::new(),
            volumes: Vec::new(),
            expose: Vec::new(),
            ports: Vec::new(),
            healthcheck: None,
        }
    }

    #[must_use]
    pub const fn replicas(mut self, count: u64) -> Self {
        self.replicas = Some(count);
        self
    }

    #[must_use]
    pub fn command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn volume(mut self, name: &str, mount: &str) -> Self {
        self.volumes.push((name.to_string(), mount.to_string()));
        self
    }

    #[must_use]
    pub fn expose(mut self, port: u16) -> Self {
        self.expose.push(port);
        self
    }

    /// Publish `port` on the host address held in the compose
    /// variable `bind_var`, e.g. `${DATA_BIND_ADDRESS}:5432:5432`.
    #[must_use]
    pub fn publish(mut self, bind_var: &str, port: u16) -> Self {
        self.ports.push(format!("${{{bind_var}}}:{port}:{port}"));
        self
    }

    /// Publish `container` on one host port per replica, taken from
    /// `host_ports`, e.g. `${APP_BIND_ADDRESS}:8080-8083:8080`.
    #[must_use]
    pub fn publish_range(
        mut self,
        bind_var: &str,
        host_ports: RangeInclusive<u16>,
        container: u16,
    ) -> Self {
        let (first, last) = (*host_ports.start(), *host_ports.end());
        if first == last {
            self.ports.push(format!("${{{bind_var}}}:{first}:{container}"));
        } else {
            self.ports.push(format!("${{{bind_var}}}:{first}-{last}:{container}"));
        }
        self
    }

    /// Publish a fixed host port on all interfaces.
    #[must_use]
    pub fn port(mut self, host: u16, container: u16) -> Self {
        self.ports.push(format!("{host}:{container}"));
        self
    }

    #[must_use]
    pub fn healthcheck(mut self, cmd: &str) -> Self {
        self.healthcheck = Some(cmd.to_string());
        self
    }

    /// `name:port` of the first exposed port, or the bare name.
    #[must_use]
    pub fn upstream(&self) -> String {
        self.expose
            .first()
            .map_or_else(|| self.name.clone(), |port| format!("{}:{port}", self.name))
    }

    /// Whether the service runs more than one container.
    #[must_use]
    pub const fn is_replicated(&self) -> bool {
        self.replicas.is_some()
    }
}
