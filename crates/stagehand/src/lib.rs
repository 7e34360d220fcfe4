//! # Stagehand
//!
//! A staging-workflow orchestrator for Nexus-style repository managers.
//!
//! Stagehand drives the lifecycle of a remote *staging repository* — a
//! temporary, server-hosted holding area for build artifacts pending
//! validation — across a multi-module build: open it once, deploy every
//! module's artifacts into it, close it (which runs server-side rules),
//! and finally release or drop it.
//!
//! ## Workflow
//!
//! The core flow is **start → deploy → close → \[promote\] → release | drop**:
//!
//! 1. [`sequencer::Sequencer::start`] opens a staging repository against a
//!    staging profile and persists its id so later invocations can resume.
//! 2. Each module's artifacts land in the local staging tree; the last
//!    module with the deploy step triggers the bulk upload ([`zapper`]) and
//!    the close.
//! 3. Closing evaluates server-side rules. On a rule failure the full rule
//!    detail is surfaced and, unless configured otherwise, the repository
//!    is dropped as a compensating action before the failure propagates.
//! 4. `release` moves a closed repository's contents to the permanent
//!    repository; `drop` discards it; `promote` groups closed repositories
//!    under a build-promotion profile.
//!
//! Two-shot workflows are supported: deploy locally in one invocation, then
//! finish remotely later with `deploy-staged`.
//!
//! ## Key Types
//!
//! - `StagingParameters` — validated, immutable configuration for one run
//! - `StagingClient` — the remote staging service seam
//! - `BuildReactor` — ordered module list with first/last gating queries
//! - `Sequencer` — the workflow state machine
//! - `ConnectionDescriptor` — resolved credentials and proxy for a server
//!
//! ## CLI Usage
//!
//! For command-line usage, see the `stagehand-cli` crate.

/// Remote staging REST client (`/service/local/staging/*`).
pub mod client;

/// Validated workflow configuration and the `.stagehand.toml` loader.
pub mod params;

/// Reactor queries: execution root and first/last module with the plugin.
pub mod reactor;

/// Credential store, proxy selection, and connection resolution.
pub mod settings;

/// Staging repository identity persistence (property file).
pub mod store;

/// The staging workflow state machine.
pub mod sequencer;

/// Domain types: repositories, profiles, remote errors.
pub mod types;

/// Bulk upload of a local staging tree to the remote repository.
pub mod zapper;
