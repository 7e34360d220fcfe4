//! Validated workflow configuration.
//!
//! [`StagingParameters`] is constructed once per invocation via
//! [`StagingParameters::build`] and is immutable afterwards. Invalid values
//! fail construction with a message naming the offending flag — nothing is
//! silently coerced. Project-level defaults can come from a `.stagehand.toml`
//! file merged underneath the command-line flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer};

/// Default credential lookup key when `--server-id` is not given.
pub const DEFAULT_SERVER_ID: &str = "nexus";

/// Default wait for asynchronous server-side rule evaluation.
pub const DEFAULT_RULE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default poll interval while waiting on rule evaluation.
pub const DEFAULT_RULE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Configuration for one staging workflow run.
#[derive(Debug, Clone)]
pub struct StagingParameters {
    /// Base URL of the repository manager, e.g. `https://oss.example.org/`.
    pub nexus_url: String,
    /// Credential lookup key into the settings file.
    pub server_id: String,
    /// Explicit repository id override; comma-separated for multi-repository
    /// actions. Always wins over the persisted identity record.
    pub staging_repository_id: Option<String>,
    /// Staging profile to open repositories under. Required for `start`.
    pub staging_profile_id: Option<String>,
    /// Audit-trail description; a per-action default is used when absent.
    pub description: Option<String>,
    /// Replaces the derived staging directory entirely when set.
    pub alt_staging_directory: Option<PathBuf>,
    /// How long to wait for server-side rule evaluation to settle.
    pub rule_timeout: Duration,
    /// Poll interval while waiting on rule evaluation.
    pub rule_poll_interval: Duration,
    /// Leave the repository open after deploy (finish it in a later run).
    pub skip_close: bool,
    /// Stage locally only; no remote repository is opened or uploaded to.
    pub skip_remote_staging: bool,
    /// Deploy straight to the open repository without a local staging tree.
    pub skip_local_staging: bool,
    /// Keep the repository for inspection when close rules fail, instead of
    /// issuing the compensating drop.
    pub keep_on_close_rule_failure: bool,
    /// Keep the repository when the build fails mid-workflow.
    pub keep_on_build_failure: bool,
    /// Chain `release` immediately after a successful `close`.
    pub auto_release_after_close: bool,
    /// Clear the local identity record after `release`.
    pub auto_drop_after_release: bool,
    /// Never fall back to a proxy of the other protocol.
    pub strict_proxies: bool,
}

impl Default for StagingParameters {
    fn default() -> Self {
        Self {
            nexus_url: String::new(),
            server_id: DEFAULT_SERVER_ID.to_string(),
            staging_repository_id: None,
            staging_profile_id: None,
            description: None,
            alt_staging_directory: None,
            rule_timeout: DEFAULT_RULE_TIMEOUT,
            rule_poll_interval: DEFAULT_RULE_POLL_INTERVAL,
            skip_close: false,
            skip_remote_staging: false,
            skip_local_staging: false,
            keep_on_close_rule_failure: false,
            keep_on_build_failure: false,
            auto_release_after_close: false,
            auto_drop_after_release: false,
            strict_proxies: false,
        }
    }
}

impl StagingParameters {
    /// Validate and freeze the parameters.
    pub fn build(self) -> Result<Self> {
        validate_nexus_url(&self.nexus_url)?;
        if self.server_id.trim().is_empty() {
            bail!("server id is required (--server-id)");
        }
        if self.rule_poll_interval.is_zero() {
            bail!("rule poll interval must be positive (--rule-poll)");
        }
        Ok(self)
    }

    /// The explicit repository id override, split on commas, empty entries
    /// discarded. `None` when no override was supplied.
    pub fn repository_id_override(&self) -> Option<Vec<String>> {
        let raw = self.staging_repository_id.as_deref()?;
        let ids: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() { None } else { Some(ids) }
    }
}

/// Reject URLs that are empty, non-HTTP, or already point inside the
/// staging service (the base URL must be the bare repository-manager root).
fn validate_nexus_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        bail!("Nexus base URL is required (--nexus-url)");
    }
    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        bail!("Nexus base URL must start with http:// or https:// (--nexus-url): {url}");
    }
    for segment in ["/service/local/", "/content/repositories/"] {
        if lower.contains(segment) {
            bail!(
                "Nexus base URL must not contain the service path {segment}; \
                 pass the bare base URL (--nexus-url): {url}"
            );
        }
    }
    Ok(())
}

/// Project-level defaults from `.stagehand.toml`.
///
/// Every field is optional; the CLI merges these *underneath* explicit
/// command-line flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub nexus_url: Option<String>,
    pub server_id: Option<String>,
    pub staging_profile_id: Option<String>,
    pub description: Option<String>,
    pub staging_directory: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub rule_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub rule_poll_interval: Option<Duration>,
    pub keep_on_close_rule_failure: Option<bool>,
    pub keep_on_build_failure: Option<bool>,
    pub auto_release_after_close: Option<bool>,
    pub auto_drop_after_release: Option<bool>,
    pub strict_proxies: Option<bool>,
}

/// Conventional config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".stagehand.toml";

impl ConfigFile {
    /// Load `.stagehand.toml` from `dir` if present. A missing file is not
    /// an error; a malformed one is.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let cfg: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(Some(cfg))
    }

    /// Fill in any parameter the caller left at its default.
    pub fn apply_defaults(&self, params: &mut StagingParameters) {
        if params.nexus_url.is_empty()
            && let Some(url) = &self.nexus_url
        {
            params.nexus_url = url.clone();
        }
        if params.server_id == DEFAULT_SERVER_ID
            && let Some(id) = &self.server_id
        {
            params.server_id = id.clone();
        }
        if params.staging_profile_id.is_none() {
            params.staging_profile_id = self.staging_profile_id.clone();
        }
        if params.description.is_none() {
            params.description = self.description.clone();
        }
        if params.alt_staging_directory.is_none() {
            params.alt_staging_directory = self.staging_directory.clone();
        }
        if let Some(t) = self.rule_timeout
            && params.rule_timeout == DEFAULT_RULE_TIMEOUT
        {
            params.rule_timeout = t;
        }
        if let Some(t) = self.rule_poll_interval
            && params.rule_poll_interval == DEFAULT_RULE_POLL_INTERVAL
        {
            params.rule_poll_interval = t;
        }
        if let Some(v) = self.keep_on_close_rule_failure {
            params.keep_on_close_rule_failure = params.keep_on_close_rule_failure || v;
        }
        if let Some(v) = self.keep_on_build_failure {
            params.keep_on_build_failure = params.keep_on_build_failure || v;
        }
        if let Some(v) = self.auto_release_after_close {
            params.auto_release_after_close = params.auto_release_after_close || v;
        }
        if let Some(v) = self.auto_drop_after_release {
            params.auto_drop_after_release = params.auto_drop_after_release || v;
        }
        if let Some(v) = self.strict_proxies {
            params.strict_proxies = params.strict_proxies || v;
        }
    }
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        None => Ok(None),
        Some(s) => humantime::parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn valid() -> StagingParameters {
        StagingParameters {
            nexus_url: "https://oss.example.org/".to_string(),
            ..StagingParameters::default()
        }
    }

    #[test]
    fn accepts_well_formed_url_with_or_without_trailing_slash() {
        assert!(valid().build().is_ok());
        let mut p = valid();
        p.nexus_url = "https://oss.example.org".to_string();
        assert!(p.build().is_ok());
    }

    #[test]
    fn scheme_match_is_case_insensitive() {
        let mut p = valid();
        p.nexus_url = "HTTPS://oss.example.org/".to_string();
        assert!(p.build().is_ok());
    }

    #[test]
    fn rejects_empty_url() {
        let mut p = valid();
        p.nexus_url = String::new();
        let err = p.build().unwrap_err();
        assert!(err.to_string().contains("--nexus-url"));
    }

    #[test]
    fn rejects_non_http_url() {
        let mut p = valid();
        p.nexus_url = "ftp://oss.example.org/".to_string();
        assert!(p.build().is_err());
    }

    #[test]
    fn rejects_url_embedding_service_paths() {
        for bad in [
            "https://oss.example.org/service/local/staging",
            "https://oss.example.org/content/repositories/releases",
        ] {
            let mut p = valid();
            p.nexus_url = bad.to_string();
            assert!(p.build().is_err(), "should reject {bad}");
        }
    }

    #[test]
    fn rejects_missing_server_id() {
        let mut p = valid();
        p.server_id = "  ".to_string();
        let err = p.build().unwrap_err();
        assert!(err.to_string().contains("--server-id"));
    }

    #[test]
    fn repository_id_override_splits_on_commas() {
        let mut p = valid();
        p.staging_repository_id = Some("orgfoo-1, orgfoo-2,,orgfoo-3".to_string());
        let ids = p.repository_id_override().expect("ids");
        assert_eq!(ids, vec!["orgfoo-1", "orgfoo-2", "orgfoo-3"]);

        p.staging_repository_id = Some(" , ".to_string());
        assert!(p.repository_id_override().is_none());
    }

    #[test]
    fn config_file_merges_under_explicit_values() {
        let td = tempdir().expect("tempdir");
        fs::write(
            td.path().join(CONFIG_FILE_NAME),
            r#"
nexus_url = "https://cfg.example.org/"
server_id = "cfg-server"
staging_profile_id = "cafebabe"
rule_timeout = "10m"
auto_release_after_close = true
"#,
        )
        .expect("write config");

        let cfg = ConfigFile::load(td.path()).expect("load").expect("present");

        let mut params = StagingParameters::default();
        cfg.apply_defaults(&mut params);
        assert_eq!(params.nexus_url, "https://cfg.example.org/");
        assert_eq!(params.server_id, "cfg-server");
        assert_eq!(params.staging_profile_id.as_deref(), Some("cafebabe"));
        assert_eq!(params.rule_timeout, Duration::from_secs(600));
        assert!(params.auto_release_after_close);

        // Explicit values win over the file.
        let mut explicit = StagingParameters {
            nexus_url: "https://cli.example.org/".to_string(),
            server_id: "cli-server".to_string(),
            ..StagingParameters::default()
        };
        cfg.apply_defaults(&mut explicit);
        assert_eq!(explicit.nexus_url, "https://cli.example.org/");
        assert_eq!(explicit.server_id, "cli-server");
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let td = tempdir().expect("tempdir");
        assert!(ConfigFile::load(td.path()).expect("load").is_none());
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let td = tempdir().expect("tempdir");
        fs::write(td.path().join(CONFIG_FILE_NAME), "nexus_url = 42").expect("write");
        assert!(ConfigFile::load(td.path()).is_err());
    }
}
