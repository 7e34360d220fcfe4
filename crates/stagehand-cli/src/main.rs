use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use stagehand::client::{HttpStagingClient, StagingClient};
use stagehand::params::{ConfigFile, DEFAULT_SERVER_ID, StagingParameters};
use stagehand::reactor::{BuildReactor, Module, PluginIdent};
use stagehand::sequencer::{Reporter, Sequencer};
use stagehand::settings::{NoDecryptor, Settings, default_settings_path};
use stagehand::store;

#[derive(Parser, Debug)]
#[command(name = "stagehand", version)]
#[command(about = "Staging workflow orchestration for Nexus-style repository managers")]
struct Cli {
    /// Base URL of the repository manager, e.g. https://oss.example.org/
    #[arg(long, default_value = "")]
    nexus_url: String,

    /// Credential lookup key in the settings file.
    #[arg(long, default_value = DEFAULT_SERVER_ID)]
    server_id: String,

    /// Explicit staging repository id; comma-separated for bulk actions.
    /// Overrides the persisted identity record.
    #[arg(long)]
    staging_repository_id: Option<String>,

    /// Staging profile to open repositories under.
    #[arg(long)]
    staging_profile_id: Option<String>,

    /// Audit-trail description recorded by the server (default: per-action).
    #[arg(long)]
    description: Option<String>,

    /// Local staging directory (default: ./target/nexus-staging).
    #[arg(long)]
    staging_directory: Option<PathBuf>,

    /// Settings file with server credentials and proxies
    /// (default: $STAGEHAND_SETTINGS, else ~/.stagehand/settings.toml).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// How long to wait for server-side rule evaluation (e.g. 5m).
    #[arg(long, default_value = "5m")]
    rule_timeout: String,

    /// Poll interval while waiting on rule evaluation (e.g. 3s).
    #[arg(long, default_value = "3s")]
    rule_poll: String,

    /// Leave the staging repository open instead of closing it.
    #[arg(long)]
    skip_close: bool,

    /// Stage locally only; do not touch the remote staging service.
    #[arg(long)]
    skip_remote_staging: bool,

    /// The build deployed directly to the open repository; skip the upload.
    #[arg(long)]
    skip_local_staging: bool,

    /// Keep the repository when close rules fail, instead of dropping it.
    #[arg(long)]
    keep_on_rule_failure: bool,

    /// Keep the repository when the build fails mid-workflow.
    #[arg(long)]
    keep_on_build_failure: bool,

    /// Chain release immediately after a successful close.
    #[arg(long)]
    auto_release_after_close: bool,

    /// Clear the local identity record after release.
    #[arg(long)]
    auto_drop_after_release: bool,

    /// Never fall back to a proxy of the other protocol.
    #[arg(long)]
    strict_proxies: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Close the staging repository, running server-side rules.
    Close,
    /// Release the closed repository into the permanent repository.
    Release,
    /// Drop the staging repository and its contents.
    Drop,
    /// Group closed repositories under a build promotion profile.
    Promote {
        /// Build promotion profile to group the repositories under.
        #[arg(long)]
        build_promotion_profile_id: Option<String>,
    },
    /// Upload a locally staged tree, then close (two-shot finish).
    DeployStaged,
    /// List staging repositories.
    RcList,
    /// List staging profiles.
    RcListProfiles,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut reporter = CliReporter;
    run(cli, &mut reporter)
}

fn run(cli: Cli, reporter: &mut dyn Reporter) -> Result<()> {
    let cwd = env::current_dir().context("cannot determine working directory")?;

    let mut params = StagingParameters {
        nexus_url: cli.nexus_url,
        server_id: cli.server_id,
        staging_repository_id: cli.staging_repository_id,
        staging_profile_id: cli.staging_profile_id,
        description: cli.description,
        alt_staging_directory: cli.staging_directory,
        rule_timeout: parse_duration(&cli.rule_timeout)?,
        rule_poll_interval: parse_duration(&cli.rule_poll)?,
        skip_close: cli.skip_close,
        skip_remote_staging: cli.skip_remote_staging,
        skip_local_staging: cli.skip_local_staging,
        keep_on_close_rule_failure: cli.keep_on_rule_failure,
        keep_on_build_failure: cli.keep_on_build_failure,
        auto_release_after_close: cli.auto_release_after_close,
        auto_drop_after_release: cli.auto_drop_after_release,
        strict_proxies: cli.strict_proxies,
    };
    if let Some(cfg) = ConfigFile::load(&cwd)? {
        cfg.apply_defaults(&mut params);
    }
    let params = params.build()?;

    let settings_path = match cli.settings {
        Some(p) => p,
        None => default_settings_path()?,
    };
    let settings = Settings::load_or_default(&settings_path)?;
    let conn = settings.connection_for(
        &params.server_id,
        &params.nexus_url,
        params.strict_proxies,
        &NoDecryptor,
    )?;

    let client = HttpStagingClient::new(&conn, params.rule_timeout, params.rule_poll_interval)?;

    // A goal invoked directly from the command line acts on the working
    // directory as a single-module reactor.
    let module_name = cwd
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());
    let reactor = BuildReactor::single(Module {
        name: module_name,
        base_dir: cwd,
        plugins: Vec::new(),
    });
    let ident = PluginIdent::new("org.stagehand", "stagehand");
    let staging_dir =
        store::default_staging_dir(&reactor, &ident, params.alt_staging_directory.as_deref());

    let sequencer = Sequencer::new(&params, &client, staging_dir, Some(&conn));

    match cli.cmd {
        Commands::Close => sequencer.close(reporter)?,
        Commands::Release => sequencer.release(reporter)?,
        Commands::Drop => sequencer.drop_repositories(reporter)?,
        Commands::Promote {
            build_promotion_profile_id,
        } => {
            sequencer.promote(build_promotion_profile_id.as_deref(), reporter)?;
        }
        Commands::DeployStaged => sequencer.deploy_staged(reporter)?,
        Commands::RcList => print_repositories(&client)?,
        Commands::RcListProfiles => print_profiles(&client)?,
    }
    Ok(())
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn print_repositories(client: &dyn StagingClient) -> Result<()> {
    for repo in client.list_repositories()? {
        println!(
            "{}  {}  {}",
            repo.repository_id, repo.state, repo.description
        );
    }
    Ok(())
}

fn print_profiles(client: &dyn StagingClient) -> Result<()> {
    for profile in client.list_profiles()? {
        println!("{}  {}  {}", profile.profile_id, profile.name, profile.mode);
    }
    Ok(())
}
