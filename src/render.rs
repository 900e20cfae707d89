//! The three generated artifacts and how they land on disk.

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::caddy::Caddy;
use crate::caddyfile;
use crate::compose;
use crate::config::StackConfig;
use crate::envfile;
use crate::error::DeployResult;
use crate::topology::Topology;

/// Kinds of generated artifact, each with a stable file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Env,
    Compose,
    Caddyfile,
}

impl ArtifactKind {
    pub const ALL: [Self; 3] = [Self::Env, Self::Compose, Self::Caddyfile];

    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Env => ".env",
            Self::Compose => "docker-compose.yml",
            Self::Caddyfile => "Caddyfile",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Output of one render: environment file, compose document and
/// edge routing document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfigSet {
    pub env: String,
    pub compose: String,
    /// `None` when the edge router does not run on this node.
    pub caddyfile: Option<String>,
}

impl RenderedConfigSet {
    #[must_use]
    pub fn get(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Env => Some(&self.env),
            ArtifactKind::Compose => Some(&self.compose),
            ArtifactKind::Caddyfile => self.caddyfile.as_deref(),
        }
    }

    /// Write every present artifact into `dir`. The `.env` file
    /// is written owner-readable only.
    pub fn write_to(&self, dir: &Path) -> DeployResult<()> {
        for kind in ArtifactKind::ALL {
            let path = dir.join(kind.file_name());
            let Some(content) = self.get(kind) else {
                // A Caddyfile left from a role that ran the edge router.
                if path.is_file() {
                    fs::remove_file(&path)?;
                }
                continue;
            };
            match kind {
                ArtifactKind::Env => envfile::write_private(&path, content.as_bytes())?,
                ArtifactKind::Compose | ArtifactKind::Caddyfile => fs::write(&path, content)?,
            }
        }
        info!(dir = %dir.display(), "wrote configuration");
        Ok(())
    }
}

/// Validate `config` and render all artifacts.
///
/// Pure apart from validation: the same configuration always
/// renders the same bytes. Nothing is written on failure.
pub fn render(config: &StackConfig) -> DeployResult<RenderedConfigSet> {
    config.validate()?;

    let topology = Topology::plan(config);
    let compose = compose::render(&topology, &config.project)?;
    let caddyfile = config
        .runs_edge()
        .then(|| caddyfile::render(&Caddy::for_stack(config)));

    Ok(RenderedConfigSet {
        env: config.to_env().render(),
        compose,
        caddyfile,
    })
}
