use caddyfile_rs::{Caddyfile, SiteBlock, format, parse, tokenize};
use stackpilot::caddy::Caddy;
use stackpilot::caddyfile;
use stackpilot::{CapacityInput, DeploymentRole, StackConfig};

#[test]
fn stack_caddyfile() {
    let config = StackConfig::new(
        DeploymentRole::All,
        CapacityInput::with_default_rate(100).unwrap(),
    )
    .domain("api.example.com", "app.example.com")
    .acme_email("ops@example.com");

    let result = caddyfile::render(&Caddy::for_stack(&config));

    assert!(result.contains("api.example.com {"));
    assert!(result.contains("app.example.com {"));
    assert!(result.contains("\ttls ops@example.com"));
    assert!(result.contains("reverse_proxy api:8080"));
    assert!(result.contains("reverse_proxy client:3000"));
    assert!(result.contains("encode gzip"));
    assert!(result.contains("X-Frame-Options"));
}

#[test]
fn minimal_caddyfile() {
    let caddy = Caddy::new().route("test.dev", "backend:8080");

    let result = caddyfile::render(&caddy);

    assert!(result.contains("test.dev {"));
    assert!(result.contains("reverse_proxy backend:8080"));
    assert!(!result.contains("tls"));
    assert!(!result.contains("encode gzip"));
}

#[test]
fn remote_api_is_balanced_over_replica_ports() {
    let config = StackConfig::new(
        DeploymentRole::Edge,
        CapacityInput::with_default_rate(100).unwrap(),
    )
    .domain("api.example.com", "app.example.com")
    .acme_email("ops@example.com")
    .app_host("10.0.0.3");

    let result = caddyfile::render(&Caddy::for_stack(&config));

    assert!(result.contains("reverse_proxy 10.0.0.3:8080 10.0.0.3:8081 {"));
    assert!(result.contains("lb_policy round_robin"));
    assert!(result.contains("reverse_proxy 10.0.0.3:3000\n"));

    let tokens = tokenize(&result).expect("tokenize failed");
    assert_eq!(parse(&tokens).expect("parse failed").sites.len(), 2);
}

#[test]
fn no_routes_renders_empty() {
    let result = caddyfile::render(&Caddy::new().gzip());

    assert!(!result.contains('{'));
    assert!(!result.contains("reverse_proxy"));
}

#[test]
fn rendered_output_parses() {
    let caddy = Caddy::new()
        .secure_route("a.example.com", "api:8080")
        .route("b.example.com", "client:3000")
        .email("ops@example.com")
        .gzip();

    let rendered = caddyfile::render(&caddy);
    let tokens = tokenize(&rendered).expect("tokenize failed");
    let parsed = parse(&tokens).expect("parse failed");

    assert_eq!(parsed.sites.len(), 2);
}

#[test]
fn parse_roundtrip() {
    let input = "\
example.com {
\treverse_proxy app:3000
\tencode gzip
\tlog
}
";
    let tokens = tokenize(input).expect("tokenize failed");
    let cf = parse(&tokens).expect("parse failed");
    assert_eq!(format(&cf), input);
}

#[test]
fn builder_roundtrip() {
    let cf = Caddyfile::new().site(
        SiteBlock::new("example.com")
            .reverse_proxy("app:3000")
            .encode_gzip(),
    );
    let formatted = format(&cf);
    let tokens = tokenize(&formatted).expect("tokenize failed");
    let parsed = parse(&tokens).expect("parse failed");

    assert_eq!(parsed.sites.len(), 1);
    assert_eq!(
        parsed.sites[0].directives.len(),
        cf.sites[0].directives.len()
    );
}
