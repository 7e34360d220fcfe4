use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Remote lifecycle state of a staging repository.
///
/// The local process only ever holds a *believed* state; the repository
/// itself lives on the server. Valid transitions are
/// `Open → Closed → {Released | Dropped}`, with `Grouped` reachable from
/// `Closed` via an explicit promote and eventually released itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryState {
    Open,
    Closed,
    Released,
    Dropped,
    #[serde(alias = "group")]
    Grouped,
}

impl RepositoryState {
    /// Parse the state string the staging service reports.
    pub fn from_remote(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "released" => Some(Self::Released),
            "dropped" | "deleted" => Some(Self::Dropped),
            "group" | "grouped" => Some(Self::Grouped),
            _ => None,
        }
    }

    /// Whether no further workflow transition can act on the repository.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Dropped)
    }
}

impl std::fmt::Display for RepositoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Released => "released",
            Self::Dropped => "dropped",
            Self::Grouped => "grouped",
        })
    }
}

/// A handle onto a remotely-hosted staging repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingRepository {
    /// Opaque id assigned by the server on start, e.g. `orgfoo-1042`.
    pub repository_id: String,
    /// Staging profile the repository was created under.
    pub profile_id: String,
    /// Audit-trail description recorded by the server.
    pub description: String,
    pub state: RepositoryState,
    /// Whether the server is still evaluating rules for this repository.
    pub transitioning: bool,
}

/// A staging profile as reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingProfile {
    pub profile_id: String,
    pub name: String,
    /// Profile mode, e.g. `STAGING` or `GROUP` (build promotion).
    pub mode: String,
}

/// Application-level failure reported by the staging service.
///
/// Distinguished from network-level failures (connection refused, bad URL)
/// by carrying a confirmed HTTP status and response body: only this kind of
/// failure may trigger the compensating drop, because only here is there a
/// repository confirmed to exist on the server.
#[derive(Debug, Error)]
#[error("staging service responded {status}: {}", summary(.body, .rule_failures))]
pub struct RemoteError {
    pub status: u16,
    /// Raw response body, dumped in full before the wrapped error so
    /// operators can diagnose server-side rule failures.
    pub body: String,
    /// Per-rule failure messages parsed out of the body, if any.
    pub rule_failures: Vec<String>,
}

impl RemoteError {
    pub fn has_rule_failures(&self) -> bool {
        !self.rule_failures.is_empty()
    }
}

fn summary(body: &str, rule_failures: &[String]) -> String {
    if let Some(first) = rule_failures.first() {
        if rule_failures.len() > 1 {
            format!("{first} (and {} more)", rule_failures.len() - 1)
        } else {
            first.clone()
        }
    } else {
        let trimmed = body.trim();
        if trimmed.chars().count() > 200 {
            let head: String = trimmed.chars().take(200).collect();
            format!("{head}…")
        } else {
            trimmed.to_string()
        }
    }
}
