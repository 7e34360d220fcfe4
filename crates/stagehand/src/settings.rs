//! Credential store, proxy selection, and connection resolution.
//!
//! Settings live in a TOML file (by default `~/.stagehand/settings.toml`)
//! holding `[servers.<id>]` credential entries and `[[proxies]]` entries.
//! [`Settings::connection_for`] resolves one server plus the applicable
//! proxy into a [`ConnectionDescriptor`] the HTTP layer consumes. Secrets
//! that look encrypted are passed through a [`CredentialDecryptor`]
//! capability; plaintext values pass through unchanged.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::Deserialize;

/// One `[servers.<id>]` credential entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub username: String,
    pub password: String,
}

/// One `[[proxies]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Proxy {
    pub id: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// `http` or `https`; matched against the target URL's scheme.
    pub protocol: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Pipe-separated glob patterns (`*` wildcard, case-sensitive) of hosts
    /// that must not go through this proxy.
    #[serde(default)]
    pub non_proxy_hosts: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Parsed settings file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub servers: BTreeMap<String, Server>,
    #[serde(default)]
    pub proxies: Vec<Proxy>,
}

/// Resolved proxy half of a connection descriptor.
#[derive(Debug, Clone)]
pub struct ResolvedProxy {
    /// `http://host:port` form consumed by the HTTP client.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Everything the HTTP layer needs to talk to one server.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub proxy: Option<ResolvedProxy>,
}

/// Decryption capability for credential values.
///
/// The actual cipher is an external concern; stagehand only decides *when*
/// to invoke it (values wrapped in `{...}`) and treats failure as fatal.
pub trait CredentialDecryptor {
    fn decrypt(&self, value: &str) -> Result<String>;
}

/// Default decryptor for installations without a master key: encrypted
/// values are a configuration error rather than silently passed through.
pub struct NoDecryptor;

impl CredentialDecryptor for NoDecryptor {
    fn decrypt(&self, _value: &str) -> Result<String> {
        bail!("encountered an encrypted credential but no master key is configured")
    }
}

/// Whether a credential value is in the encrypted `{...}` envelope form.
pub fn looks_encrypted(value: &str) -> bool {
    let v = value.trim();
    v.len() > 2 && v.starts_with('{') && v.ends_with('}')
}

impl Settings {
    /// Parse the settings file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        Ok(settings)
    }

    /// Like [`Settings::load`] but a missing file yields empty settings.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve `server_id` and the proxy applicable to `base_url` into a
    /// connection descriptor. A missing server entry is fatal; so is a
    /// failing decryption.
    pub fn connection_for(
        &self,
        server_id: &str,
        base_url: &str,
        strict_proxies: bool,
        decryptor: &dyn CredentialDecryptor,
    ) -> Result<ConnectionDescriptor> {
        let server = self.servers.get(server_id).with_context(|| {
            format!("server '{server_id}' not found in settings (--server-id)")
        })?;

        let username = decrypt_if_needed(&server.username, decryptor)
            .with_context(|| format!("failed to decrypt username for server '{server_id}'"))?;
        let password = decrypt_if_needed(&server.password, decryptor)
            .with_context(|| format!("failed to decrypt password for server '{server_id}'"))?;

        let proxy = match select_proxy(&self.proxies, base_url, strict_proxies)? {
            Some(p) => Some(ResolvedProxy {
                url: format!("http://{}:{}", p.host, p.port),
                username: p
                    .username
                    .as_deref()
                    .map(|u| decrypt_if_needed(u, decryptor))
                    .transpose()
                    .with_context(|| format!("failed to decrypt proxy '{}' username", p.id))?,
                password: p
                    .password
                    .as_deref()
                    .map(|v| decrypt_if_needed(v, decryptor))
                    .transpose()
                    .with_context(|| format!("failed to decrypt proxy '{}' password", p.id))?,
            }),
            None => None,
        };

        Ok(ConnectionDescriptor {
            base_url: base_url.to_string(),
            username,
            password,
            proxy,
        })
    }
}

fn decrypt_if_needed(value: &str, decryptor: &dyn CredentialDecryptor) -> Result<String> {
    if looks_encrypted(value) {
        decryptor.decrypt(value)
    } else {
        Ok(value.to_string())
    }
}

/// Pick the proxy to use for `target_url`, or `None` for a direct
/// connection.
///
/// The first *active* proxy whose protocol matches the URL scheme and whose
/// `non_proxy_hosts` list does not match the target host wins. In strict
/// mode there is no cross-protocol fallback; in legacy (non-strict) mode an
/// `https` request with no matching `https` proxy falls back to an `http`
/// proxy entry, while `http` requests never fall back to an `https`-only
/// entry.
pub fn select_proxy<'a>(
    proxies: &'a [Proxy],
    target_url: &str,
    strict: bool,
) -> Result<Option<&'a Proxy>> {
    let url = Url::parse(target_url)
        .with_context(|| format!("malformed target URL for proxy selection: {target_url}"))?;
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url
        .host_str()
        .with_context(|| format!("target URL has no host: {target_url}"))?;

    if let Some(p) = proxy_for_protocol(proxies, &scheme, host) {
        return Ok(Some(p));
    }
    if !strict && scheme == "https" {
        return Ok(proxy_for_protocol(proxies, "http", host));
    }
    Ok(None)
}

fn proxy_for_protocol<'a>(proxies: &'a [Proxy], protocol: &str, host: &str) -> Option<&'a Proxy> {
    proxies.iter().find(|p| {
        p.active
            && p.protocol.eq_ignore_ascii_case(protocol)
            && !is_non_proxy_host(p.non_proxy_hosts.as_deref(), host)
    })
}

fn is_non_proxy_host(patterns: Option<&str>, host: &str) -> bool {
    let Some(patterns) = patterns else {
        return false;
    };
    patterns
        .split('|')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|pattern| glob_match(pattern, host))
}

/// Case-sensitive glob match where `*` matches any run of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[u8], t: &[u8]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some((&b'*', rest)) => (0..=t.len()).any(|i| rec(rest, &t[i..])),
            Some((c, rest)) => t.split_first().is_some_and(|(tc, tr)| tc == c && rec(rest, tr)),
        }
    }
    rec(pattern.as_bytes(), text.as_bytes())
}

/// Default settings file location: `$STAGEHAND_SETTINGS`, else
/// `~/.stagehand/settings.toml`.
pub fn default_settings_path() -> Result<PathBuf> {
    if let Ok(p) = env::var("STAGEHAND_SETTINGS") {
        return Ok(PathBuf::from(p));
    }
    let home = env::var("HOME").context("HOME env var not set; set STAGEHAND_SETTINGS or HOME")?;
    Ok(PathBuf::from(home).join(".stagehand").join("settings.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(id: &str, protocol: &str, non_proxy_hosts: Option<&str>) -> Proxy {
        Proxy {
            id: id.to_string(),
            active: true,
            protocol: protocol.to_string(),
            host: format!("{id}.proxy.example"),
            port: 8080,
            username: None,
            password: None,
            non_proxy_hosts: non_proxy_hosts.map(str::to_string),
        }
    }

    fn both_proxies() -> Vec<Proxy> {
        vec![
            proxy("http", "http", Some("localhost")),
            proxy("https", "https", Some("localhost")),
        ]
    }

    #[test]
    fn non_proxy_host_is_bypassed() {
        let proxies = both_proxies();
        let got = select_proxy(&proxies, "http://localhost/", false).expect("select");
        assert!(got.is_none());
    }

    #[test]
    fn protocol_matching_proxy_is_selected() {
        let proxies = both_proxies();
        let got = select_proxy(&proxies, "http://remote/", false).expect("select");
        assert_eq!(got.expect("proxy").id, "http");
        let got = select_proxy(&proxies, "https://remote/", false).expect("select");
        assert_eq!(got.expect("proxy").id, "https");
    }

    #[test]
    fn nonstrict_https_falls_back_to_http_proxy() {
        let proxies = vec![proxy("http", "http", Some("localhost"))];
        let got = select_proxy(&proxies, "https://remote/", false).expect("select");
        assert_eq!(got.expect("proxy").id, "http");
    }

    #[test]
    fn strict_https_does_not_fall_back() {
        let proxies = vec![proxy("http", "http", Some("localhost"))];
        let got = select_proxy(&proxies, "https://remote/", true).expect("select");
        assert!(got.is_none());
    }

    #[test]
    fn http_never_falls_back_to_https_proxy() {
        let proxies = vec![proxy("https", "https", None)];
        for strict in [false, true] {
            let got = select_proxy(&proxies, "http://remote/", strict).expect("select");
            assert!(got.is_none(), "strict={strict}");
        }
    }

    #[test]
    fn inactive_proxies_are_skipped() {
        let mut p = proxy("http", "http", None);
        p.active = false;
        let proxies = [p];
        let got = select_proxy(&proxies, "http://remote/", false).expect("select");
        assert!(got.is_none());
    }

    #[test]
    fn glob_patterns_match_hosts() {
        assert!(glob_match("*.example.org", "ci.example.org"));
        assert!(glob_match("host*", "hostname"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "Exact")); // case-sensitive
        assert!(!glob_match("*.example.org", "example.org"));
    }

    #[test]
    fn pipe_separated_patterns_any_match_bypasses() {
        let proxies = vec![proxy("http", "http", Some("localhost | *.internal.example"))];
        let got = select_proxy(&proxies, "http://build.internal.example/", false).expect("select");
        assert!(got.is_none());
        let got = select_proxy(&proxies, "http://remote/", false).expect("select");
        assert!(got.is_some());
    }

    #[test]
    fn malformed_target_url_is_an_error() {
        assert!(select_proxy(&[], "not a url", false).is_err());
    }

    struct UpperDecryptor;

    impl CredentialDecryptor for UpperDecryptor {
        fn decrypt(&self, value: &str) -> Result<String> {
            let inner = value.trim().trim_start_matches('{').trim_end_matches('}');
            Ok(inner.to_ascii_uppercase())
        }
    }

    fn settings_toml() -> Settings {
        toml::from_str(
            r#"
[servers.nexus]
username = "deployer"
password = "{c2VjcmV0}"

[[proxies]]
id = "corp"
protocol = "https"
host = "proxy.corp.example"
port = 3128
username = "proxyuser"
password = "proxypass"
"#,
        )
        .expect("parse settings")
    }

    #[test]
    fn connection_resolves_server_and_proxy() {
        let settings = settings_toml();
        let conn = settings
            .connection_for("nexus", "https://oss.example.org/", true, &UpperDecryptor)
            .expect("connection");
        assert_eq!(conn.username, "deployer");
        assert_eq!(conn.password, "C2VJCMV0");
        let proxy = conn.proxy.expect("proxy");
        assert_eq!(proxy.url, "http://proxy.corp.example:3128");
        assert_eq!(proxy.username.as_deref(), Some("proxyuser"));
    }

    #[test]
    fn missing_server_entry_is_fatal() {
        let settings = settings_toml();
        let err = settings
            .connection_for("other", "https://oss.example.org/", true, &NoDecryptor)
            .unwrap_err();
        assert!(err.to_string().contains("other"));
    }

    #[test]
    fn decryption_failure_aborts_resolution() {
        let settings = settings_toml();
        let err = settings
            .connection_for("nexus", "https://oss.example.org/", true, &NoDecryptor)
            .unwrap_err();
        assert!(format!("{err:#}").contains("no master key"));
    }

    #[test]
    fn plaintext_credentials_pass_through_unchanged() {
        let settings: Settings = toml::from_str(
            r#"
[servers.nexus]
username = "user"
password = "plain"
"#,
        )
        .expect("parse");
        let conn = settings
            .connection_for("nexus", "http://oss.example.org/", false, &NoDecryptor)
            .expect("connection");
        assert_eq!(conn.password, "plain");
        assert!(conn.proxy.is_none());
    }
}
