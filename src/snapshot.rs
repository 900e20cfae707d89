//! Change-aware snapshots of the generated configuration.
//!
//! Before the working directory's artifacts are overwritten, they
//! are compared against the newest snapshot by SHA-256. A new
//! snapshot is taken only when something differs, and only the
//! newest `retention` snapshots are kept.
//!
//! Each snapshot directory carries a `manifest.json` with one hash
//! per artifact kind, so comparing never re-reads old snapshot
//! files unless a manifest is missing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::envfile;
use crate::error::DeployResult;
use crate::render::{ArtifactKind, RenderedConfigSet};

const PREFIX: &str = "config-";
const MANIFEST: &str = "manifest.json";

/// Artifact contents keyed by kind. Absent kinds are simply
/// missing from the map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    files: BTreeMap<ArtifactKind, Vec<u8>>,
}

impl ArtifactSet {
    /// Read whichever artifacts currently exist in `dir`.
    pub fn read_from(dir: &Path) -> DeployResult<Self> {
        let mut files = BTreeMap::new();
        for kind in ArtifactKind::ALL {
            let path = dir.join(kind.file_name());
            if path.is_file() {
                files.insert(kind, fs::read(&path)?);
            }
        }
        Ok(Self { files })
    }

    #[must_use]
    pub fn from_rendered(rendered: &RenderedConfigSet) -> Self {
        let files = ArtifactKind::ALL
            .into_iter()
            .filter_map(|kind| rendered.get(kind).map(|c| (kind, c.as_bytes().to_vec())))
            .collect();
        Self { files }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn get(&self, kind: ArtifactKind) -> Option<&[u8]> {
        self.files.get(&kind).map(Vec::as_slice)
    }

    fn hashes(&self) -> BTreeMap<String, String> {
        self.files
            .iter()
            .map(|(kind, bytes)| (kind.file_name().to_string(), sha256_hex(bytes)))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    created_at: String,
    artifacts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotResult {
    pub created: bool,
    pub path: Option<PathBuf>,
}

/// Snapshots under `root`, newest `retention` kept.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    root: PathBuf,
    retention: usize,
}

impl SnapshotManager {
    #[must_use]
    pub fn new(root: &Path, retention: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            retention: retention.max(1),
        }
    }

    /// Snapshot directories, newest first.
    pub fn list(&self) -> DeployResult<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(PREFIX))
            })
            .collect();

        // Names embed a zero-padded UTC timestamp, so name order is
        // creation order.
        dirs.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(dirs)
    }

    pub fn latest(&self) -> DeployResult<Option<PathBuf>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Snapshot `current` if it differs from the newest snapshot.
    pub fn maybe_snapshot(&self, current: &ArtifactSet) -> DeployResult<SnapshotResult> {
        self.maybe_snapshot_at(current, Utc::now())
    }

    /// As [`Self::maybe_snapshot`], with an explicit timestamp for
    /// the snapshot name.
    pub fn maybe_snapshot_at(
        &self,
        current: &ArtifactSet,
        now: DateTime<Utc>,
    ) -> DeployResult<SnapshotResult> {
        if current.is_empty() {
            debug!("no artifacts to snapshot");
            return Ok(SnapshotResult {
                created: false,
                path: None,
            });
        }

        let current_hashes = current.hashes();

        if let Some(latest) = self.latest()? {
            let previous = snapshot_hashes(&latest)?;
            if previous == current_hashes {
                debug!(latest = %latest.display(), "configuration unchanged, no snapshot");
                return Ok(SnapshotResult {
                    created: false,
                    path: Some(latest),
                });
            }
        }

        let path = self.create(current, current_hashes, now)?;
        info!(path = %path.display(), "configuration snapshot created");
        self.prune();

        Ok(SnapshotResult {
            created: true,
            path: Some(path),
        })
    }

    fn create(
        &self,
        current: &ArtifactSet,
        hashes: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> DeployResult<PathBuf> {
        envfile::create_private_dir(&self.root)?;

        let base = format!("{PREFIX}{}", now.format("%Y%m%d-%H%M%S-%6f"));
        let mut path = self.root.join(&base);
        let mut suffix = 1;
        while path.exists() {
            path = self.root.join(format!("{base}-{suffix:02}"));
            suffix += 1;
        }
        envfile::create_private_dir(&path)?;

        for (kind, bytes) in &current.files {
            let file = path.join(kind.file_name());
            match kind {
                ArtifactKind::Env => envfile::write_private(&file, bytes)?,
                ArtifactKind::Compose | ArtifactKind::Caddyfile => fs::write(&file, bytes)?,
            }
        }

        let manifest = Manifest {
            created_at: now.to_rfc3339(),
            artifacts: hashes,
        };
        fs::write(path.join(MANIFEST), serde_json::to_vec_pretty(&manifest)?)?;

        Ok(path)
    }

    /// Delete snapshots beyond the retention count. Failures are
    /// logged and skipped. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let dirs = match self.list() {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!(error = %e, "could not list snapshots for pruning");
                return 0;
            }
        };

        let mut removed = 0;
        for old in dirs.iter().skip(self.retention) {
            match fs::remove_dir_all(old) {
                Ok(()) => {
                    debug!(path = %old.display(), "pruned snapshot");
                    removed += 1;
                }
                Err(e) => warn!(path = %old.display(), error = %e, "could not prune snapshot"),
            }
        }
        removed
    }
}

/// Hashes recorded for a snapshot, from its manifest or, when the
/// manifest is missing or unreadable, by hashing its files.
fn snapshot_hashes(dir: &Path) -> DeployResult<BTreeMap<String, String>> {
    let manifest_path = dir.join(MANIFEST);
    if let Ok(bytes) = fs::read(&manifest_path) {
        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(manifest) => return Ok(manifest.artifacts),
            Err(e) => warn!(path = %manifest_path.display(), error = %e, "unreadable manifest"),
        }
    }
    Ok(ArtifactSet::read_from(dir)?.hashes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn retention_never_zero() {
        let manager = SnapshotManager::new(Path::new("/tmp/none"), 0);
        assert_eq!(manager.retention, 1);
    }

    #[test]
    fn from_rendered_skips_absent_caddyfile() {
        let rendered = RenderedConfigSet {
            env: "A=1\n".into(),
            compose: "services: {}\n".into(),
            caddyfile: None,
        };
        let set = ArtifactSet::from_rendered(&rendered);

        assert!(set.get(ArtifactKind::Env).is_some());
        assert!(set.get(ArtifactKind::Caddyfile).is_none());
    }
}
