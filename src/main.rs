// Allow panic/unwrap/expect in tests (denied globally via Cargo.toml lints)
#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        clippy::arithmetic_side_effects,
        clippy::indexing_slicing
    )
)]

use acctsync::accounts::SystemHost;
use acctsync::authconfig::set_local_database;
use acctsync::config::{read_config, SyncConfig, DEFAULT_CONFIG_PATH};
use acctsync::daemon::{CommandEventSource, Daemon, EventFilter, TerminationSignals};
use acctsync::directory::directory_from_config;
use acctsync::info::{group_info, host_status, system_group_exists, user_info};
use acctsync::logging::{init_logging, level_for_verbosity, parse_rotation, LogConfig};
use acctsync::nssdb::Makedb;
use acctsync::pipeline::{InstallOptions, Pipeline};
use acctsync::privilege;
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use color_eyre::eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Synchronize directory-service accounts into local NSS databases, home
/// directories and SSH keys
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, global = true, env = "ACCTSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Account service URL, overriding the configuration file
    #[arg(long, global = true, env = "ACCTSYNC_SERVER")]
    server: Option<String>,

    /// Account service login, overriding the configuration file
    #[arg(long, global = true, env = "ACCTSYNC_LOGIN")]
    login: Option<String>,

    /// Enable JSON log format (for log aggregation)
    #[arg(long, global = true, env = "ACCTSYNC_LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Also write logs to this directory
    #[arg(long, global = true, env = "ACCTSYNC_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// More verbose logging (repeat for trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synchronize accounts, groups, home directories and SSH keys
    Install(InstallArgs),
    /// Turn the local account database on
    Enable(PrefixArgs),
    /// Turn the local account database off
    Disable(PrefixArgs),
    /// Show a remote user, a remote group, or this host's status
    Info(InfoArgs),
    /// Resynchronize whenever the account service reports a change
    Daemon,
}

#[derive(ClapArgs, Debug)]
struct PrefixArgs {
    /// Root directory to operate under
    #[arg(long, default_value = "/")]
    prefix: PathBuf,
}

#[derive(ClapArgs, Debug)]
#[allow(clippy::struct_excessive_bools)]
struct InstallArgs {
    #[command(flatten)]
    prefix: PrefixArgs,

    /// Turn the local account database off instead of on
    #[arg(long)]
    disable_auth: bool,

    /// Skip home directory reconciliation
    #[arg(long)]
    no_home: bool,

    /// Skip the group database
    #[arg(long)]
    no_group: bool,

    /// Skip the passwd database
    #[arg(long)]
    no_password: bool,

    /// Skip the shadow database
    #[arg(long)]
    no_shadow: bool,

    /// Skip SSH key provisioning
    #[arg(long)]
    no_ssh: bool,

    /// Bypass the account service's group cache
    #[arg(long)]
    force_refresh: bool,
}

impl InstallArgs {
    fn options(&self) -> InstallOptions {
        InstallOptions {
            prefix: self.prefix.prefix.clone(),
            homes: !self.no_home,
            groups: !self.no_group,
            passwords: !self.no_password,
            shadow: !self.no_shadow,
            ssh_keys: !self.no_ssh,
            force_refresh: self.force_refresh,
            local_auth: Some(!self.disable_auth),
        }
    }
}

#[derive(ClapArgs, Debug)]
struct InfoArgs {
    /// Remote user to describe
    #[arg(long, conflicts_with = "groupname")]
    username: Option<String>,

    /// Remote group to describe
    #[arg(long)]
    groupname: Option<String>,

    #[command(flatten)]
    prefix: PrefixArgs,
}

fn build_pipeline(config: &Arc<SyncConfig>) -> Result<Pipeline> {
    let directory = directory_from_config(&config.directory)?;
    Ok(Pipeline::new(
        Arc::clone(config),
        directory,
        Arc::new(Makedb::new(&config.nss.makedb)),
        Arc::new(SystemHost),
    ))
}

async fn install(config: &Arc<SyncConfig>, args: &InstallArgs) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let report = pipeline.run(&args.options()).await?;

    info!(
        accounts = report.accounts,
        databases = report.installed.len(),
        "Synchronization complete"
    );
    if let Some(homes) = &report.homes {
        for name in &homes.failed {
            warn!(username = %name, "Home directory was not set up");
        }
    }
    if let Some(keys) = &report.keys {
        for name in &keys.locked {
            warn!(username = %name, "Home directory locked after an SSH key failure");
        }
    }
    Ok(())
}

async fn toggle(config: &SyncConfig, args: &PrefixArgs, enabled: bool) -> Result<()> {
    set_local_database(&config.auth, &args.prefix, enabled).await?;
    if enabled {
        info!("Local account database enabled.");
    } else {
        info!("Local account database disabled.");
    }
    Ok(())
}

async fn show_info(config: &SyncConfig, args: &InfoArgs) -> Result<()> {
    if args.username.is_none() && args.groupname.is_none() {
        let status = host_status(config, &args.prefix.prefix, system_group_exists).await?;
        println!("{status}");
        return Ok(());
    }

    let directory = directory_from_config(&config.directory)?;
    let snapshot = directory.snapshot(false).await?;
    if let Some(username) = &args.username {
        println!("{}", user_info(&snapshot, username)?);
    }
    if let Some(groupname) = &args.groupname {
        println!("{}", group_info(&snapshot, config, groupname, system_group_exists)?);
    }
    Ok(())
}

async fn run_daemon(config: &Arc<SyncConfig>) -> Result<()> {
    // Registered before anything else so an early signal is not lost.
    let mut signals = TerminationSignals::register()?;

    let filter = EventFilter::from_config(config)?;
    let daemon = Daemon::new(Arc::new(build_pipeline(config)?), filter, config.grace_period()?);
    let source = CommandEventSource::spawn(&config.daemon.command)?;

    let stats = daemon
        .run(source, async move {
            signals.recv().await;
        })
        .await?;
    info!(events = stats.events, resyncs = stats.resyncs, "Daemon stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre error hooks for colored error output
    color_eyre::install()?;

    let args = Args::parse();

    // Every privilege scope restores to the identity the process started with.
    privilege::capture_original_identity()?;

    let mut config = read_config(&args.config).await?;
    config.apply_overrides(args.server.as_deref(), args.login.as_deref());
    config.validate()?;

    let log_config = LogConfig {
        log_dir: args.log_dir.clone().or_else(|| config.logging.dir.clone()),
        log_level: level_for_verbosity(args.verbose),
        json_format: args.log_json || config.logging.json,
        rotation: parse_rotation(&config.logging.rotation),
    };
    if let Err(e) = init_logging(log_config) {
        eprintln!("Error: Failed to initialize logging: {e}");
        return Err(e);
    }

    let config = Arc::new(config);
    match &args.command {
        Command::Install(install_args) => install(&config, install_args).await,
        Command::Enable(prefix) => toggle(&config, prefix, true).await,
        Command::Disable(prefix) => toggle(&config, prefix, false).await,
        Command::Info(info_args) => show_info(&config, info_args).await,
        Command::Daemon => run_daemon(&config).await,
    }
}
