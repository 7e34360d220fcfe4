//! Remote staging REST client.
//!
//! [`StagingClient`] is the seam between the workflow sequencer and the
//! staging service; [`HttpStagingClient`] implements it against the
//! `/service/local/staging/*` JSON endpoints with a blocking HTTP client.
//! Application-level failures come back as [`RemoteError`] carrying the
//! status, the full response body, and any parsed rule-failure messages;
//! network-level failures stay plain transport errors (nothing confirmed
//! on the server, so no compensating action may act on them).

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::settings::ConnectionDescriptor;
use crate::types::{RemoteError, RepositoryState, StagingProfile, StagingRepository};

/// Operations of the staging service consumed by the sequencer.
pub trait StagingClient {
    /// Open a staging repository under `profile_id`; returns the new id.
    fn start(&self, profile_id: &str, description: &str) -> Result<String>;

    /// Close the repositories, triggering server-side rule evaluation.
    fn close(&self, ids: &[String], description: &str) -> Result<()>;

    /// Group the closed repositories under a build-promotion profile;
    /// returns the id of the newly created group repository.
    fn promote(&self, build_profile_id: &str, ids: &[String], description: &str) -> Result<String>;

    /// Move the repositories' contents into the permanent repository.
    fn release(&self, ids: &[String], description: &str) -> Result<()>;

    /// Discard the repositories and their contents.
    fn drop_repositories(&self, ids: &[String], description: &str) -> Result<()>;

    /// Current remote state of one repository.
    fn repository(&self, id: &str) -> Result<StagingRepository>;

    fn list_repositories(&self) -> Result<Vec<StagingRepository>>;

    fn list_profiles(&self) -> Result<Vec<StagingProfile>>;
}

/// Blocking HTTP implementation of [`StagingClient`].
pub struct HttpStagingClient {
    base: String,
    http: Client,
    username: String,
    password: String,
    rule_timeout: Duration,
    rule_poll_interval: Duration,
}

impl HttpStagingClient {
    pub fn new(
        conn: &ConnectionDescriptor,
        rule_timeout: Duration,
        rule_poll_interval: Duration,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(format!("stagehand/{}", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = &conn.proxy {
            let mut p = reqwest::Proxy::all(&proxy.url)
                .with_context(|| format!("invalid proxy URL {}", proxy.url))?;
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                p = p.basic_auth(user, pass);
            }
            builder = builder.proxy(p);
        }

        let http = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            base: conn.base_url.trim_end_matches('/').to_string(),
            http,
            username: conn.username.clone(),
            password: conn.password.clone(),
            rule_timeout,
            rule_poll_interval,
        })
    }

    fn staging_url(&self, tail: &str) -> String {
        format!("{}/service/local/staging/{tail}", self.base)
    }

    fn get(&self, tail: &str) -> Result<Response> {
        let url = self.staging_url(tail);
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .with_context(|| format!("staging request failed: GET {url}"))?;
        check_status(resp)
    }

    fn post<T: Serialize>(&self, tail: &str, body: &T) -> Result<Response> {
        let url = self.staging_url(tail);
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .with_context(|| format!("staging request failed: POST {url}"))?;
        check_status(resp)
    }

    /// Block until every repository has settled out of rule evaluation,
    /// failing if one settles anywhere other than `Closed` or the timeout
    /// elapses. No cancellation path; no automatic retries.
    fn wait_for_close(&self, ids: &[String]) -> Result<()> {
        let started = Instant::now();
        for id in ids {
            loop {
                let repo = self.repository(id)?;
                if !repo.transitioning {
                    match repo.state {
                        RepositoryState::Closed => break,
                        _ => {
                            let body = serde_json::to_string(&repo)
                                .unwrap_or_else(|_| format!("repository {id}"));
                            return Err(RemoteError {
                                status: StatusCode::CONFLICT.as_u16(),
                                body,
                                rule_failures: Vec::new(),
                            }
                            .into());
                        }
                    }
                }
                if started.elapsed() >= self.rule_timeout {
                    bail!(
                        "timed out after {} waiting for rule evaluation of staging repository {id}",
                        humantime::format_duration(self.rule_timeout)
                    );
                }
                thread::sleep(self.rule_poll_interval);
            }
        }
        Ok(())
    }
}

impl StagingClient for HttpStagingClient {
    fn start(&self, profile_id: &str, description: &str) -> Result<String> {
        let body = ActionRequest::start(description);
        let resp = self.post(&format!("profiles/{profile_id}/start"), &body)?;
        let env: DataEnvelope<StartedRepository> =
            resp.json().context("failed to parse start response")?;
        Ok(env.data.staged_repository_id)
    }

    fn close(&self, ids: &[String], description: &str) -> Result<()> {
        let body = ActionRequest::bulk(ids, description);
        self.post("bulk/close", &body)?;
        self.wait_for_close(ids)
    }

    fn promote(&self, build_profile_id: &str, ids: &[String], description: &str) -> Result<String> {
        let body = ActionRequest::bulk(ids, description);
        let resp = self.post(&format!("profiles/{build_profile_id}/promote"), &body)?;
        let env: DataEnvelope<StartedRepository> =
            resp.json().context("failed to parse promote response")?;
        Ok(env.data.staged_repository_id)
    }

    fn release(&self, ids: &[String], description: &str) -> Result<()> {
        let body = ActionRequest::bulk(ids, description);
        self.post("bulk/release", &body)?;
        Ok(())
    }

    fn drop_repositories(&self, ids: &[String], description: &str) -> Result<()> {
        let body = ActionRequest::bulk(ids, description);
        self.post("bulk/drop", &body)?;
        Ok(())
    }

    fn repository(&self, id: &str) -> Result<StagingRepository> {
        let resp = self.get(&format!("repository/{id}"))?;
        let dto: RepositoryDto = resp
            .json()
            .with_context(|| format!("failed to parse state of staging repository {id}"))?;
        dto.into_repository()
    }

    fn list_repositories(&self) -> Result<Vec<StagingRepository>> {
        let resp = self.get("profile_repositories")?;
        let env: DataEnvelope<Vec<RepositoryDto>> = resp
            .json()
            .context("failed to parse staging repository list")?;
        env.data.into_iter().map(RepositoryDto::into_repository).collect()
    }

    fn list_profiles(&self) -> Result<Vec<StagingProfile>> {
        let resp = self.get("profiles")?;
        let env: DataEnvelope<Vec<ProfileDto>> =
            resp.json().context("failed to parse staging profile list")?;
        Ok(env
            .data
            .into_iter()
            .map(|p| StagingProfile {
                profile_id: p.id,
                name: p.name,
                mode: p.mode,
            })
            .collect())
    }
}

/// Map a non-success response to [`RemoteError`], keeping the full body.
fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(RemoteError {
        status: status.as_u16(),
        rule_failures: parse_rule_failures(&body),
        body,
    }
    .into())
}

/// Pull per-rule failure messages out of an error body of the form
/// `{"errors":[{"id":"...","msg":"..."}]}`. Anything else yields none.
fn parse_rule_failures(body: &str) -> Vec<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        errors: Vec<ErrorEntry>,
    }
    #[derive(Deserialize)]
    struct ErrorEntry {
        #[serde(default)]
        msg: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|b| {
            b.errors
                .into_iter()
                .map(|e| e.msg)
                .filter(|m| !m.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Serialize)]
struct ActionRequest<'a> {
    data: ActionData<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionData<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    staged_repository_ids: Option<&'a [String]>,
    description: &'a str,
}

impl<'a> ActionRequest<'a> {
    fn start(description: &'a str) -> Self {
        Self {
            data: ActionData {
                staged_repository_ids: None,
                description,
            },
        }
    }

    fn bulk(ids: &'a [String], description: &'a str) -> Self {
        Self {
            data: ActionData {
                staged_repository_ids: Some(ids),
                description,
            },
        }
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartedRepository {
    staged_repository_id: String,
}

#[derive(Deserialize)]
struct ProfileDto {
    id: String,
    name: String,
    mode: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryDto {
    repository_id: String,
    #[serde(default)]
    profile_id: String,
    #[serde(default)]
    description: String,
    /// State string as the service reports it, e.g. `open`, `closed`.
    #[serde(rename = "type")]
    state: String,
    #[serde(default)]
    transitioning: bool,
}

impl RepositoryDto {
    fn into_repository(self) -> Result<StagingRepository> {
        let state = RepositoryState::from_remote(&self.state).with_context(|| {
            format!(
                "staging repository {} reported unknown state '{}'",
                self.repository_id, self.state
            )
        })?;
        Ok(StagingRepository {
            repository_id: self.repository_id,
            profile_id: self.profile_id,
            description: self.description,
            state,
            transitioning: self.transitioning,
        })
    }
}
