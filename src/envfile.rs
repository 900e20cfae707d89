//! Flat `KEY=value` state file.
//!
//! Order of first insertion is preserved so that re-rendering the
//! same configuration produces the same bytes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use indexmap::IndexMap;

use crate::error::DeployResult;

const HEADER: &str = "# Managed by stackpilot. Contains credentials: keep this file private.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: IndexMap<String, String>,
}

impl EnvFile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `KEY=value` lines. Blank lines and `#` comments are
    /// skipped, an optional `export ` prefix is accepted, and one
    /// layer of matching single or double quotes is removed.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut entries = IndexMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            entries.insert(key.to_string(), unquote(value.trim()).to_string());
        }

        Self { entries }
    }

    /// Read and parse `path`, or `None` if it does not exist.
    pub fn load(path: &Path) -> DeployResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(Self::parse(&content)))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Non-empty value for `key`.
    #[must_use]
    pub fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Copy entries from `other` whose keys are not already set.
    pub fn merge_missing(&mut self, other: &Self) {
        for (key, value) in &other.entries {
            if !self.entries.contains_key(key) {
                self.entries.insert(key.clone(), value.clone());
            }
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Write `content` to `path`, readable by the owner only on Unix.
/// The mode is set when the file is created, and tightened before
/// writing when it already exists.
pub fn write_private(path: &Path, content: &[u8]) -> DeployResult<()> {
    let mut file = private_options().open(path)?;
    restrict_permissions(&file)?;
    file.write_all(content)?;
    Ok(())
}

/// Create `path` and any missing parents, new directories being
/// accessible by the owner only on Unix.
pub fn create_private_dir(path: &Path) -> DeployResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)?;
    Ok(())
}

fn private_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

#[cfg(unix)]
fn restrict_permissions(file: &File) -> DeployResult<()> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &File) -> DeployResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blanks() {
        let env = EnvFile::parse("# header\n\nA=1\n  B = two \n#C=3\n");

        assert_eq!(env.get("A"), Some("1"));
        assert_eq!(env.get("B"), Some("two"));
        assert_eq!(env.get("C"), None);
    }

    #[test]
    fn parse_handles_quotes_and_export() {
        let env = EnvFile::parse("export A=\"x y\"\nB='z'\nC=\"\nD=a=b\n");

        assert_eq!(env.get("A"), Some("x y"));
        assert_eq!(env.get("B"), Some("z"));
        assert_eq!(env.get("C"), Some("\""));
        assert_eq!(env.get("D"), Some("a=b"));
    }

    #[test]
    fn render_preserves_insertion_order() {
        let mut env = EnvFile::new();
        env.set("Z", "1");
        env.set("A", "2");
        env.set("Z", "3");

        assert_eq!(env.render(), format!("{HEADER}\nZ=3\nA=2\n"));
    }

    #[test]
    fn parse_render_is_stable() {
        let mut env = EnvFile::new();
        env.set("DOMAIN", "example.com");
        env.set("EMPTY", "");

        let again = EnvFile::parse(&env.render());
        assert_eq!(again, env);
    }

    #[test]
    fn merge_missing_keeps_existing() {
        let mut env = EnvFile::parse("A=1\n");
        let other = EnvFile::parse("A=9\nB=2\n");

        env.merge_missing(&other);

        assert_eq!(env.get("A"), Some("1"));
        assert_eq!(env.get("B"), Some("2"));
    }

    #[test]
    fn get_nonempty_filters_blank() {
        let env = EnvFile::parse("A=\n");
        assert_eq!(env.get("A"), Some(""));
        assert_eq!(env.get_nonempty("A"), None);
    }

    #[cfg(unix)]
    fn mode(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[cfg(unix)]
    #[test]
    fn write_private_creates_owner_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");

        write_private(&path, b"A=1\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "A=1\n");
        assert_eq!(mode(&path), 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn write_private_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "OLD=value-that-is-longer\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        write_private(&path, b"A=1\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "A=1\n");
        assert_eq!(mode(&path), 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn private_dir_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("snapshots").join("config-1");

        create_private_dir(&nested).unwrap();

        assert_eq!(mode(&nested), 0o700);
        assert_eq!(mode(&dir.path().join("snapshots")), 0o700);
    }
}
