//! Where the generated files live.

use std::path::{Path, PathBuf};

use crate::error::{DeployError, DeployResult};
use crate::prompt::Prompter;
use crate::render::ArtifactKind;

pub const WORKDIR_ENV: &str = "STACKPILOT_WORKDIR";

/// Pick the working directory: explicit flag, then the
/// `STACKPILOT_WORKDIR` value, then a prompt defaulting to the
/// current directory.
pub fn resolve(
    flag: Option<PathBuf>,
    env_value: Option<String>,
    prompter: &mut dyn Prompter,
) -> DeployResult<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(dir) = env_value.filter(|v| !v.trim().is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    let cwd = std::env::current_dir()?;
    let answer = prompter.text("Working directory", Some(&cwd.display().to_string()))?;
    if answer.trim().is_empty() {
        return Err(DeployError::required("working directory"));
    }
    Ok(PathBuf::from(answer.trim()))
}

/// File layout of a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
}

impl Paths {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    #[must_use]
    pub fn artifact(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    #[must_use]
    pub fn env(&self) -> PathBuf {
        self.artifact(ArtifactKind::Env)
    }

    #[must_use]
    pub fn snapshots(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Create the directory if it does not exist yet.
    pub fn ensure(&self) -> DeployResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Fail unless a previous install left a `.env` behind.
    pub fn require_installed(&self) -> DeployResult<()> {
        let env = self.env();
        if env.is_file() {
            Ok(())
        } else {
            Err(DeployError::FileNotFound(format!(
                "{} (run `stackpilot install` first)",
                env.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Unattended;

    #[test]
    fn flag_wins_over_env() {
        let dir = resolve(
            Some(PathBuf::from("/opt/flag")),
            Some("/opt/env".into()),
            &mut Unattended,
        )
        .unwrap();
        assert_eq!(dir, PathBuf::from("/opt/flag"));
    }

    #[test]
    fn env_used_without_flag() {
        let dir = resolve(None, Some("/opt/env".into()), &mut Unattended).unwrap();
        assert_eq!(dir, PathBuf::from("/opt/env"));
    }

    #[test]
    fn falls_back_to_current_dir() {
        let dir = resolve(None, Some(String::new()), &mut Unattended).unwrap();
        assert_eq!(dir, std::env::current_dir().unwrap());
    }

    #[test]
    fn paths_layout() {
        let paths = Paths::new(Path::new("/opt/stack"));

        assert_eq!(paths.env(), PathBuf::from("/opt/stack/.env"));
        assert_eq!(
            paths.artifact(ArtifactKind::Compose),
            PathBuf::from("/opt/stack/docker-compose.yml")
        );
        assert_eq!(paths.snapshots(), PathBuf::from("/opt/stack/snapshots"));
    }
}
