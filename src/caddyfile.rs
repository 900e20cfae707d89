use caddyfile_rs::{Caddyfile, Directive, SiteBlock, format};

use crate::caddy::Caddy;

/// Render a Caddyfile with one site block per route.
#[must_use]
pub fn render(caddy: &Caddy) -> String {
    let mut caddyfile = Caddyfile::new();

    for route in &caddy.routes {
        let mut site = SiteBlock::new(&route.hostname);

        if let Some(email) = &caddy.email {
            site = site.directive(Directive::new(&format!("tls {email}")));
        }

        site = site.directive(reverse_proxy(&route.upstreams));

        if caddy.gzip {
            site = site.encode_gzip();
        }

        if route.security_headers {
            site = site.security_headers();
        }

        caddyfile = caddyfile.site(site);
    }

    format(&caddyfile)
}

/// `reverse_proxy` to every upstream. Several upstreams are
/// rotated round robin, and one that refuses a connection is
/// skipped for a while.
fn reverse_proxy(upstreams: &[String]) -> Directive {
    let proxy = upstreams
        .iter()
        .fold(Directive::new("reverse_proxy"), |d, upstream| d.arg(upstream));
    if upstreams.len() < 2 {
        return proxy;
    }
    proxy.block(vec![
        Directive::new("lb_policy").arg("round_robin"),
        Directive::new("lb_try_duration").arg("5s"),
        Directive::new("fail_duration").arg("30s"),
    ])
}
