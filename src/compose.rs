use docker_compose_types::{
    Command, Compose, ComposeNetworks, ComposeVolume, Deploy, Environment, Healthcheck,
    HealthcheckTest, Labels, MapOrEmpty, NetworkSettings, Networks, Ports, Service, Services,
    TopLevelVolumes, Volumes,
};
use indexmap::IndexMap;

use crate::error::DeployResult;
use crate::service::ServiceSpec;
use crate::topology::Topology;

/// Render a complete `docker-compose.yml` for the topology.
///
/// Every service is emitted with its profile; nothing about the
/// node role appears in the document itself.
pub fn render(topology: &Topology, project: &str) -> DeployResult<String> {
    let network = network_name(project);

    let services = topology
        .services
        .iter()
        .map(|svc| (svc.name.clone(), Some(service(svc, &network))))
        .collect();

    let compose = Compose {
        services: Services(services),
        volumes: top_level_volumes(&topology.services),
        networks: networks(&network),
        ..Default::default()
    };

    Ok(serde_yaml::to_string(&compose)?)
}

#[must_use]
pub fn network_name(project: &str) -> String {
    format!("{project}-network")
}

fn service(svc: &ServiceSpec, network: &str) -> Service {
    let expose: Vec<String> = svc.expose.iter().map(ToString::to_string).collect();

    let environment = if svc.env.is_empty() {
        Environment::default()
    } else {
        Environment::List(svc.env.iter().map(|(k, v)| format!("{k}={v}")).collect())
    };

    let volumes: Vec<Volumes> = svc
        .volumes
        .iter()
        .map(|(name, mount)| Volumes::Simple(format!("{name}:{mount}")))
        .collect();

    let healthcheck = svc.healthcheck.as_ref().map(|cmd| Healthcheck {
        test: Some(HealthcheckTest::Multiple(vec![
            "CMD".to_string(),
            "sh".to_string(),
            "-c".to_string(),
            cmd.clone(),
        ])),
        interval: Some("30s".to_string()),
        timeout: Some("10s".to_string()),
        retries: 3,
        start_period: Some("10s".to_string()),
        ..Default::default()
    });

    // Replicated services cannot carry a fixed container name.
    let container_name = if svc.is_replicated() {
        None
    } else {
        Some(svc.name.clone())
    };

    let deploy = svc.replicas.map(|count| Deploy {
        replicas: count.try_into().ok(),
        ..Default::default()
    });

    Service {
        image: Some(svc.image.clone()),
        container_name,
        restart: Some("unless-stopped".to_string()),
        profiles: vec![svc.profile.to_string()],
        command: svc.command.clone().map(Command::Simple),
        deploy,
        expose,
        ports: Ports::Short(svc.ports.clone()),
        environment,
        volumes,
        healthcheck,
        networks: Networks::Simple(vec![network.to_string()]),
        ..Default::default()
    }
}

fn local_volume() -> ComposeVolume {
    ComposeVolume {
        driver: Some("local".to_string()),
        driver_opts: IndexMap::new(),
        external: None,
        labels: Labels::default(),
        name: None,
    }
}

/// Bind mounts are paths, not named volumes.
fn is_bind_mount(source: &str) -> bool {
    source.starts_with('.') || source.starts_with('/')
}

fn top_level_volumes(services: &[ServiceSpec]) -> TopLevelVolumes {
    let mut vols = IndexMap::new();

    for (name, _) in services.iter().flat_map(|s| &s.volumes) {
        if !is_bind_mount(name) {
            vols.insert(name.clone(), MapOrEmpty::Map(local_volume()));
        }
    }

    TopLevelVolumes(vols)
}

fn networks(network: &str) -> ComposeNetworks {
    let mut nets = IndexMap::new();
    nets.insert(
        network.to_string(),
        MapOrEmpty::Map(NetworkSettings {
            driver: Some("bridge".to_string()),
            ..Default::default()
        }),
    );
    ComposeNetworks(nets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_mount_detection() {
        assert!(is_bind_mount("./Caddyfile"));
        assert!(is_bind_mount("/srv/data"));
        assert!(!is_bind_mount("caddy-data"));
    }

    #[test]
    fn network_named_after_project() {
        assert_eq!(network_name("shop"), "shop-network");
    }
}
