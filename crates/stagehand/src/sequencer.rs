//! The staging workflow state machine.
//!
//! The sequencer decides, per build-lifecycle signal (first module, each
//! module's deploy, last module, explicit goal invocation), which remote
//! transition to trigger and how to react to its outcome:
//!
//! ```text
//! NO_REPOSITORY → OPEN → CLOSED → { RELEASED | DROPPED }
//!                           │
//!                           └→ GROUPED → RELEASED        (promote)
//! ```
//!
//! Expensive transitions run exactly once per reactor, gated by the
//! first/last queries of [`crate::reactor`]. Close-rule failures dump the
//! full rule detail, then — unless configured otherwise — issue a
//! compensating drop before the failure propagates; the build fails either
//! way. Network-level failures never trigger the compensating drop, since
//! nothing is confirmed to exist remotely.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::client::StagingClient;
use crate::params::StagingParameters;
use crate::reactor::{BuildReactor, Module, PluginIdent};
use crate::settings::ConnectionDescriptor;
use crate::store::{self, IdentityRecord};
use crate::types::RemoteError;
use crate::zapper;

/// User-facing progress output. Implemented by the CLI; library code never
/// prints directly.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// One workflow run: validated parameters, the remote client, the staging
/// directory holding the local tree and the identity record, and (when an
/// upload may happen) the resolved server connection.
pub struct Sequencer<'a> {
    params: &'a StagingParameters,
    client: &'a dyn StagingClient,
    staging_dir: PathBuf,
    conn: Option<&'a ConnectionDescriptor>,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        params: &'a StagingParameters,
        client: &'a dyn StagingClient,
        staging_dir: PathBuf,
        conn: Option<&'a ConnectionDescriptor>,
    ) -> Self {
        Self {
            params,
            client,
            staging_dir,
            conn,
        }
    }

    pub fn staging_dir(&self) -> &PathBuf {
        &self.staging_dir
    }

    /// Where a build deploys artifacts for an open staging repository.
    pub fn deploy_url(&self, repository_id: &str) -> String {
        format!(
            "{}/service/local/staging/deployByRepositoryId/{repository_id}/",
            self.params.nexus_url.trim_end_matches('/')
        )
    }

    /// `NO_REPOSITORY → OPEN`. Opens a repository under the configured
    /// profile and persists its id for later invocations.
    pub fn start(&self, reporter: &mut dyn Reporter) -> Result<String> {
        let profile_id = self
            .params
            .staging_profile_id
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .context("staging profile id is required to open a repository (--staging-profile-id)")?;

        let description = self.description("Opened");
        let repository_id = match self.client.start(profile_id, &description) {
            Ok(id) => id,
            Err(err) => {
                dump_remote_detail(&err, reporter);
                return Err(err).with_context(|| {
                    format!("could not open staging repository (profile {profile_id})")
                });
            }
        };

        store::save(
            &self.staging_dir,
            &IdentityRecord {
                repository_id: repository_id.clone(),
                profile_id: profile_id.to_string(),
            },
        )?;

        reporter.info(&format!("Created staging repository \"{repository_id}\""));
        reporter.info(&format!("Deploy URL: {}", self.deploy_url(&repository_id)));
        Ok(repository_id)
    }

    /// `OPEN → CLOSED`, triggering server-side rule evaluation. On a rule
    /// failure the detail is dumped first, then the compensating drop runs
    /// (unless suppressed), then the failure propagates regardless.
    pub fn close(&self, reporter: &mut dyn Reporter) -> Result<()> {
        if self.params.skip_close {
            reporter.info("leaving staging repository open (--skip-close)");
            return Ok(());
        }

        let ids = self.resolve_ids()?;
        let description = self.description("Closed");

        if let Err(err) = self.client.close(&ids, &description) {
            dump_remote_detail(&err, reporter);
            if err.downcast_ref::<RemoteError>().is_some() {
                self.compensate_failed_close(&ids, reporter);
            }
            return Err(err)
                .with_context(|| format!("could not close staging repository {}", ids.join(", ")));
        }

        reporter.info(&format!("Closed staging repository {}", ids.join(", ")));

        if self.params.auto_release_after_close {
            self.release(reporter)?;
        }
        Ok(())
    }

    fn compensate_failed_close(&self, ids: &[String], reporter: &mut dyn Reporter) {
        if self.params.keep_on_close_rule_failure {
            reporter.warn("keeping staging repository for inspection (--keep-on-rule-failure)");
            return;
        }
        reporter.warn(&format!(
            "dropping staging repository {} after failed close",
            ids.join(", ")
        ));
        let description = self.description("Dropped");
        // The build fails on the close error either way; a failing drop
        // only downgrades to a warning.
        if let Err(drop_err) = self.client.drop_repositories(ids, &description) {
            reporter.warn(&format!("compensating drop failed: {drop_err:#}"));
        } else if let Err(io_err) = store::clear(&self.staging_dir) {
            reporter.warn(&format!("could not clear identity record: {io_err:#}"));
        }
    }

    /// `CLOSED | GROUPED → RELEASED`.
    pub fn release(&self, reporter: &mut dyn Reporter) -> Result<()> {
        let ids = self.resolve_ids()?;
        let description = self.description("Released");

        if let Err(err) = self.client.release(&ids, &description) {
            dump_remote_detail(&err, reporter);
            return Err(err).with_context(|| {
                format!("could not release staging repository {}", ids.join(", "))
            });
        }

        reporter.info(&format!("Released staging repository {}", ids.join(", ")));

        if self.params.auto_drop_after_release {
            store::clear(&self.staging_dir)?;
            reporter.info("Cleared staging repository identity record");
        }
        Ok(())
    }

    /// `OPEN | CLOSED → DROPPED`. Dropping an id that is already gone is an
    /// error report, never a crash, and leaves the identity store intact.
    pub fn drop_repositories(&self, reporter: &mut dyn Reporter) -> Result<()> {
        let ids = self.resolve_ids()?;
        let description = self.description("Dropped");

        if let Err(err) = self.client.drop_repositories(&ids, &description) {
            dump_remote_detail(&err, reporter);
            return Err(err)
                .with_context(|| format!("could not drop staging repository {}", ids.join(", ")));
        }

        store::clear(&self.staging_dir)?;
        reporter.info(&format!("Dropped staging repository {}", ids.join(", ")));
        Ok(())
    }

    /// `CLOSED → GROUPED`: join the closed repositories under a
    /// build-promotion profile. The reported group id is an observable
    /// contract — downstream tooling parses it.
    pub fn promote(
        &self,
        build_profile_id: Option<&str>,
        reporter: &mut dyn Reporter,
    ) -> Result<String> {
        let build_profile_id = build_profile_id
            .filter(|p| !p.trim().is_empty())
            .context("build promotion profile id is required (--build-promotion-profile-id)")?;

        let ids = self.resolve_ids()?;
        let description = self.description("Promoted");

        let group_id = match self.client.promote(build_profile_id, &ids, &description) {
            Ok(id) => id,
            Err(err) => {
                dump_remote_detail(&err, reporter);
                return Err(err).with_context(|| {
                    format!("could not promote staging repository {}", ids.join(", "))
                });
            }
        };

        reporter.info(&format!(
            "Created build promotion group repository \"{group_id}\""
        ));
        Ok(group_id)
    }

    /// Build-lifecycle signal for one module of the reactor. The first
    /// module with the plugin opens the repository (unless one is already
    /// known); the last one uploads the staged tree and closes.
    pub fn on_module(
        &self,
        reactor: &BuildReactor,
        current: &Module,
        ident: &PluginIdent,
        goal: Option<&str>,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        if self.params.skip_remote_staging {
            if reactor.is_last_with_plugin(current, ident, goal, false) {
                reporter.info(
                    "remote staging skipped; artifacts staged locally — finish with deploy-staged",
                );
            }
            return Ok(());
        }

        // No module declares the plugin: gated actions do not run here.
        if reactor.first_with_plugin(ident, goal).is_none() {
            return Ok(());
        }

        if reactor.is_first_with_plugin(current, ident, goal)
            && self.params.repository_id_override().is_none()
            && store::load(&self.staging_dir)?.is_none()
        {
            self.start(reporter)?;
        }

        if reactor.is_last_with_plugin(current, ident, goal, false) {
            self.finish(reporter)?;
        }
        Ok(())
    }

    /// Build failed mid-workflow: drop the open repository unless the user
    /// asked to keep it for inspection.
    pub fn on_build_failure(&self, reporter: &mut dyn Reporter) -> Result<()> {
        if self.params.keep_on_build_failure {
            reporter.warn("build failed; keeping staging repository (--keep-on-build-failure)");
            return Ok(());
        }
        let Ok(ids) = self.resolve_ids() else {
            // Nothing was opened; nothing to clean up.
            return Ok(());
        };
        reporter.warn(&format!(
            "build failed; dropping staging repository {}",
            ids.join(", ")
        ));
        self.drop_repositories(reporter)
    }

    /// Two-shot finish: make sure a repository is open, then upload the
    /// local staging tree and close.
    pub fn deploy_staged(&self, reporter: &mut dyn Reporter) -> Result<()> {
        if self.params.repository_id_override().is_none()
            && store::load(&self.staging_dir)?.is_none()
        {
            self.start(reporter)?;
        }
        self.finish(reporter)
    }

    /// Upload the staged tree (unless the build deployed directly) and run
    /// the close transition with its compensation rules.
    fn finish(&self, reporter: &mut dyn Reporter) -> Result<()> {
        if !self.params.skip_local_staging {
            let ids = self.resolve_ids()?;
            let conn = self
                .conn
                .context("no server connection resolved for the staged upload")?;
            let url = self.deploy_url(&ids[0]);
            reporter.info(&format!("Uploading staged artifacts to {url}"));
            zapper::deploy_up(&self.staging_dir, &url, conn)?;
        }
        self.close(reporter)
    }

    /// Repository ids to act on: the explicit override always wins over the
    /// persisted identity record.
    fn resolve_ids(&self) -> Result<Vec<String>> {
        if let Some(ids) = self.params.repository_id_override() {
            return Ok(ids);
        }
        let record = store::load(&self.staging_dir)?.with_context(|| {
            format!(
                "no staging repository id: pass --staging-repository-id or run a build \
                 that opened one (no identity record in {})",
                self.staging_dir.display()
            )
        })?;
        Ok(vec![record.repository_id])
    }

    /// Audit-trail description: caller-supplied, or a per-action default —
    /// never empty, since the server records it.
    fn description(&self, verb: &str) -> String {
        match self.params.description.as_deref() {
            Some(d) if !d.trim().is_empty() => d.to_string(),
            _ => format!("{verb} by stagehand"),
        }
    }
}

/// Dump the full remote error detail (status, body, every rule-failure
/// message) before the wrapped error propagates.
fn dump_remote_detail(err: &anyhow::Error, reporter: &mut dyn Reporter) {
    let Some(remote) = err.downcast_ref::<RemoteError>() else {
        return;
    };
    reporter.error(&format!("staging service responded {}", remote.status));
    if !remote.body.trim().is_empty() {
        reporter.error(remote.body.trim());
    }
    for msg in &remote.rule_failures {
        reporter.error(&format!("rule failure: {msg}"));
    }
}
