//! Role-aware capacity planner and `docker compose` driver for a
//! multi-service application stack.
//!
//! `stackpilot` turns a few answers (deployment pattern, node role,
//! domains, expected peak load) into the three files a node needs:
//! `.env`, `docker-compose.yml` and `Caddyfile`. It then rolls the
//! node forward with `docker compose` and waits for it to report
//! healthy.
//!
//! # Overview
//!
//! - [`digits`] reads numbers typed with Latin, Persian or Arabic
//!   digits and thousands separators
//! - [`capacity`] turns peak concurrent users into replica counts
//! - [`role`] maps a topology pattern and a choice to a
//!   [`DeploymentRole`]
//! - [`topology`] lists the services, with compose profiles, that
//!   the stack is made of
//! - [`render`] produces the [`RenderedConfigSet`] from a
//!   [`StackConfig`]
//! - [`snapshot`] keeps content-addressed copies of the previous
//!   render and prunes old ones
//! - [`rollout`] applies the topology and restarts replicas one at
//!   a time through a [`ContainerRuntime`]
//! - [`pipeline`] wires the stages into the CLI subcommands
//!
//! # Topologies
//!
//! | Pattern     | Roles                         |
//! |-------------|-------------------------------|
//! | single-node | everything                    |
//! | two-node    | edge+app, data                |
//! | three-node  | edge, app, data               |
//!
//! The compose document is the same on every node. Each service
//! carries a profile (`app`, `data` or `edge`) and the role only
//! selects `COMPOSE_PROFILES` in `.env`, so moving a node to a
//! different role is a re-render, not a rewrite.
//!
//! # Examples
//!
//! Render the files for a single-node install without touching
//! the disk:
//!
//! ```rust
//! use stackpilot::{CapacityInput, DeploymentRole, StackConfig, render};
//!
//! fn main() -> stackpilot::DeployResult<()> {
//!     let mut config = StackConfig::new(
//!         DeploymentRole::All,
//!         CapacityInput::with_default_rate(2000)?,
//!     )
//!     .domain("api.example.com", "app.example.com")
//!     .acme_email("ops@example.com");
//!     config.credentials.fill_missing_secrets(&mut rand::thread_rng());
//!
//!     let rendered = render::render(&config)?;
//!     assert!(rendered.compose.contains("postgres"));
//!     assert!(rendered.caddyfile.is_some());
//!     Ok(())
//! }
//! ```
//!
//! From a shell:
//!
//! ```sh
//! # Interactive install
//! stackpilot install
//!
//! # Unattended data node of a three-node deployment
//! stackpilot --non-interactive install --pattern three-node --role data
//!
//! # Preview what would be written
//! stackpilot plan
//!
//! # New load estimate
//! stackpilot scale --peak-users 20000
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod caddy;
pub mod caddyfile;
pub mod capacity;
pub mod cli;
pub mod cmd;
pub mod compose;
pub mod config;
pub mod cron;
pub mod digits;
pub mod envfile;
pub mod error;
pub mod pipeline;
pub mod prompt;
pub mod render;
pub mod role;
pub mod rollout;
pub mod runtime;
pub mod service;
pub mod snapshot;
pub mod topology;
pub mod workdir;

pub use caddy::Caddy;
pub use capacity::{CapacityInput, ReplicaPlan};
pub use config::StackConfig;
pub use error::{DeployError, DeployResult};
pub use pipeline::Pipeline;
pub use render::RenderedConfigSet;
pub use role::{DeploymentRole, RoleChoice, TopologyPattern};
pub use rollout::RolloutDriver;
pub use runtime::ContainerRuntime;
pub use snapshot::SnapshotManager;
pub use topology::Topology;
