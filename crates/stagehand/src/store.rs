//! Staging repository identity persistence.
//!
//! After a successful `start`, the new repository id and profile id are
//! written as a property-style record under the staging directory so a
//! later, independent invocation (a separate `release`, or the last module
//! of the same reactor) can act on the same repository. The file is
//! last-writer-wins: a new `start` overwrites it, and terminal actions
//! clear it. Concurrent builds sharing one staging directory are
//! undefined behavior.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::reactor::{BuildReactor, PluginIdent};

/// File name of the identity record inside the staging directory.
pub const IDENTITY_FILE: &str = "stagehand.properties";

/// Subdirectory under a module's `target/` used as the staging directory.
pub const STAGING_SUBDIR: &str = "nexus-staging";

const ID_KEY: &str = "stagingRepository.id";
const PROFILE_KEY: &str = "stagingRepository.profileId";

/// The persisted (repository id, profile id) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub repository_id: String,
    pub profile_id: String,
}

pub fn identity_path(staging_dir: &Path) -> PathBuf {
    staging_dir.join(IDENTITY_FILE)
}

/// Persist the record, creating the staging directory as needed and
/// overwriting any previous record.
pub fn save(staging_dir: &Path, record: &IdentityRecord) -> Result<()> {
    fs::create_dir_all(staging_dir)
        .with_context(|| format!("failed to create staging dir {}", staging_dir.display()))?;

    let path = identity_path(staging_dir);
    let content = format!(
        "# stagehand staging repository identity\n# {}\n{ID_KEY}={}\n{PROFILE_KEY}={}\n",
        Utc::now().to_rfc3339(),
        record.repository_id,
        record.profile_id,
    );
    fs::write(&path, content)
        .with_context(|| format!("failed to write identity record {}", path.display()))
}

/// Read the record back. A missing file, or content without the repository
/// id key, is `None` — the normal case before any `start` has happened —
/// not an error.
pub fn load(staging_dir: &Path) -> Result<Option<IdentityRecord>> {
    let path = identity_path(staging_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read identity record {}", path.display()))?;

    let mut repository_id = None;
    let mut profile_id = None;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                ID_KEY => repository_id = Some(value.trim().to_string()),
                PROFILE_KEY => profile_id = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    Ok(repository_id
        .filter(|id| !id.is_empty())
        .map(|repository_id| IdentityRecord {
            repository_id,
            profile_id: profile_id.unwrap_or_default(),
        }))
}

/// Remove the record after a terminal action; a stale record must not be
/// trusted without re-validating remote state.
pub fn clear(staging_dir: &Path) -> Result<()> {
    let path = identity_path(staging_dir);
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove identity record {}", path.display()))?;
    }
    Ok(())
}

/// Default staging directory: `target/nexus-staging` under the first module
/// declaring the plugin, falling back to the execution root when no module
/// declares it. An explicit override replaces this entirely.
pub fn default_staging_dir(
    reactor: &BuildReactor,
    ident: &PluginIdent,
    override_dir: Option<&Path>,
) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    let base = reactor
        .first_with_plugin(ident, None)
        .map(|m| m.base_dir.clone())
        .unwrap_or_else(|| {
            reactor
                .modules()
                .iter()
                .find(|m| reactor.is_execution_root(m))
                .map(|m| m.base_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."))
        });
    base.join("target").join(STAGING_SUBDIR)
}
