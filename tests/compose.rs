use docker_compose_types::{Compose, Ports, Service};
use stackpilot::compose;
use stackpilot::service::{Profile, ServiceSpec};
use stackpilot::topology::Topology;
use stackpilot::{CapacityInput, DeploymentRole, StackConfig};

fn topology(users: u64) -> Topology {
    let config = StackConfig::new(
        DeploymentRole::All,
        CapacityInput::with_default_rate(users).unwrap(),
    );
    Topology::plan(&config)
}

fn parse(yaml: &str) -> Compose {
    serde_yaml::from_str(yaml).expect("parse")
}

fn service<'a>(compose: &'a Compose, name: &str) -> &'a Service {
    compose
        .services
        .0
        .get(name)
        .and_then(Option::as_ref)
        .unwrap_or_else(|| panic!("service {name} missing"))
}

#[test]
fn generates_valid_compose() {
    let yaml = compose::render(&topology(10_000), "shop").unwrap();

    assert!(yaml.contains("services:"));
    assert!(yaml.contains("image: caddy:2-alpine"));
    assert!(yaml.contains("postgres-data:/var/lib/postgresql/data"));
    assert!(yaml.contains("shop-network:"));
}

#[test]
fn every_service_carries_its_profile() {
    let parsed = parse(&compose::render(&topology(1000), "stack").unwrap());

    for (name, profile) in [
        ("api", "app"),
        ("client", "app"),
        ("processor", "app"),
        ("worker", "app"),
        ("jobs", "app"),
        ("postgres", "data"),
        ("rabbitmq", "data"),
        ("redis", "data"),
        ("minio", "data"),
        ("caddy", "edge"),
    ] {
        assert_eq!(service(&parsed, name).profiles, vec![profile.to_string()], "{name}");
    }
}

#[test]
fn replicated_services_have_no_container_name() {
    let parsed = parse(&compose::render(&topology(10_000), "stack").unwrap());

    assert!(service(&parsed, "api").container_name.is_none());
    assert!(service(&parsed, "worker").container_name.is_none());
    assert_eq!(service(&parsed, "jobs").container_name.as_deref(), Some("jobs"));
    assert_eq!(service(&parsed, "postgres").container_name.as_deref(), Some("postgres"));
}

#[test]
fn replica_counts_follow_the_plan() {
    let yaml = compose::render(&topology(10_000), "stack").unwrap();

    assert!(yaml.contains("replicas: 10"));
    assert!(yaml.contains("replicas: 6"));
    assert!(yaml.contains("replicas: 4"));
}

#[test]
fn credentials_stay_out_of_the_document() {
    let yaml = compose::render(&topology(1000), "stack").unwrap();

    assert!(yaml.contains("${POSTGRES_PASSWORD}"));
    assert!(yaml.contains("${DATA_BIND_ADDRESS}:5432:5432"));
    assert!(yaml.contains("${APP_BIND_ADDRESS}:8080-8081:8080"));
    assert!(yaml.contains("${APP_BIND_ADDRESS}:3000:3000"));
}

/// Host side of a short port mapping as an inclusive range.
fn host_ports(mapping: &str) -> (u64, u64) {
    let (rest, _container) = mapping.rsplit_once(':').expect("container port");
    let host = rest.rsplit_once(':').map_or(rest, |(_, host)| host);
    match host.split_once('-') {
        Some((first, last)) => (first.parse().unwrap(), last.parse().unwrap()),
        None => {
            let port = host.parse().unwrap();
            (port, port)
        }
    }
}

#[test]
fn replicated_services_get_a_host_port_each() {
    for users in [1000, 10_000, 50_000] {
        let parsed = parse(&compose::render(&topology(users), "stack").unwrap());

        for (name, svc) in &parsed.services.0 {
            let svc = svc.as_ref().unwrap();
            let Some(replicas) = svc.deploy.as_ref().and_then(|d| d.replicas) else {
                continue;
            };
            let replicas = u64::try_from(replicas).unwrap();
            let Ports::Short(ports) = &svc.ports else {
                panic!("{name}: expected short port syntax");
            };
            for mapping in ports {
                let (first, last) = host_ports(mapping);
                assert!(
                    last - first + 1 >= replicas,
                    "{name}: {mapping} cannot serve {replicas} replicas"
                );
            }
        }
    }
}

#[test]
fn healthcheck_in_compose() {
    let parsed = parse(&compose::render(&topology(1000), "stack").unwrap());

    assert!(service(&parsed, "api").healthcheck.is_some());
    assert!(service(&parsed, "postgres").healthcheck.is_some());
    assert!(service(&parsed, "caddy").healthcheck.is_none());
}

#[test]
fn named_volumes_registered_bind_mounts_not() {
    let parsed = parse(&compose::render(&topology(1000), "stack").unwrap());

    for name in [
        "postgres-data",
        "rabbitmq-data",
        "redis-data",
        "minio-data",
        "caddy-data",
        "caddy-config",
    ] {
        assert!(parsed.volumes.0.contains_key(name), "{name}");
    }
    assert!(!parsed.volumes.0.contains_key("./Caddyfile"));
}

#[test]
fn single_shared_network() {
    let parsed = parse(&compose::render(&topology(1000), "stack").unwrap());

    assert_eq!(parsed.networks.0.len(), 1);
    assert!(parsed.networks.0.contains_key("stack-network"));
}

#[test]
fn custom_service_round_trip() {
    let topology = Topology {
        services: vec![
            ServiceSpec::new("tool", "tool:1", Profile::App)
                .env("KEY", "value")
                .volume("tool-data", "/data")
                .port(9090, 90),
        ],
        enabled: vec![Profile::App],
    };

    let yaml = compose::render(&topology, "lab").unwrap();
    let parsed = parse(&yaml);

    assert!(yaml.contains("KEY=value"));
    assert!(yaml.contains("9090:90"));
    assert!(parsed.volumes.0.contains_key("tool-data"));
    assert!(service(&parsed, "tool").deploy.is_none());
}
