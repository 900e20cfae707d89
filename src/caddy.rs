use crate::config::StackConfig;
use crate::topology::{
    API_PORT, CLIENT_PORT, MINIO_CONSOLE_PORT, RABBITMQ_ADMIN_PORT, api_host_ports,
};

/// One public hostname routed to one or more upstreams. Several
/// upstreams are load balanced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub hostname: String,
    pub upstreams: Vec<String>,
    /// Apply the hardening header set to this site.
    pub security_headers: bool,
}

/// Configuration for the Caddy edge router: one site per public
/// hostname plus the contact address for certificate issuance.
///
/// # Example
///
/// ```
/// use stackpilot::caddy::Caddy;
///
/// let caddy = Caddy::new()
///     .route("example.com", "api:8080")
///     .email("ops@example.com")
///     .gzip();
///
/// assert_eq!(caddy.routes.len(), 1);
/// assert!(caddy.gzip);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Caddy {
    pub routes: Vec<Route>,
    pub email: Option<String>,
    pub gzip: bool,
}

impl Caddy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes for the stack: the primary domain to the API, the
    /// client domain to the client, and the admin UIs only when
    /// their hostnames are configured.
    ///
    /// A local API is reached by service name. A remote one is
    /// balanced over the host ports its replicas publish.
    #[must_use]
    pub fn for_stack(config: &StackConfig) -> Self {
        let app = |service: &str, port: u16| format!("{}:{port}", config.app_service_host(service));
        let data =
            |service: &str, port: u16| format!("{}:{port}", config.data_service_host(service));

        let api = if config.runs_compute() {
            vec![app("api", API_PORT)]
        } else {
            api_host_ports(config.replicas.web)
                .map(|port| app("api", port))
                .collect()
        };

        let mut caddy = Self::new()
            .balanced_route(&config.domains.primary, api)
            .secure_route(&config.domains.client, &app("client", CLIENT_PORT))
            .email(&config.acme_email)
            .gzip();

        if let Some(host) = &config.domains.rabbitmq_admin {
            caddy = caddy.route(host, &data("rabbitmq", RABBITMQ_ADMIN_PORT));
        }
        if let Some(host) = &config.domains.minio_console {
            caddy = caddy.route(host, &data("minio", MINIO_CONSOLE_PORT));
        }

        caddy
    }

    #[must_use]
    pub fn route(mut self, hostname: &str, upstream: &str) -> Self {
        self.routes.push(Route {
            hostname: hostname.to_string(),
            upstreams: vec![upstream.to_string()],
            security_headers: false,
        });
        self
    }

    /// A route with the security header set applied.
    #[must_use]
    pub fn secure_route(self, hostname: &str, upstream: &str) -> Self {
        self.balanced_route(hostname, vec![upstream.to_string()])
    }

    /// A secured route spread over `upstreams`.
    #[must_use]
    pub fn balanced_route(mut self, hostname: &str, upstreams: Vec<String>) -> Self {
        self.routes.push(Route {
            hostname: hostname.to_string(),
            upstreams,
            security_headers: true,
        });
        self
    }

    #[must_use]
    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string()).filter(|e| !e.is_empty());
        self
    }

    #[must_use]
    pub const fn gzip(mut self) -> Self {
        self.gzip = true;
        self
    }
}
