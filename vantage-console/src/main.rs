use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vantage_console::approvals::{ApprovalEngine, ResolveAction, DISRUPTION_WARNING};
use vantage_console::config::{default_config_template, Config};
use vantage_console::error::{ConsoleError, Outcome, Severity};
use vantage_console::features::{MONITORING_FEATURES, RESTRICTION_FEATURES};
use vantage_console::reconciler::ToggleReconciler;
use vantage_console::remote::{ControlPlane, MockControlPlane};
use vantage_console::SiteList;
use vantage_console::session::{AdminCredential, Session};

#[derive(Parser)]
#[command(name = "vantage-console", about = "Policy configuration console for Vantage-managed endpoints", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Apply changes to an in-memory control plane instead of the real one
    #[arg(long, global = true)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and change feature toggles
    Features {
        #[command(subcommand)]
        command: FeatureCommands,
    },
    /// Inspect and resolve pending approval requests
    Approvals {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
    /// Manage the website whitelist and blocklist
    Sites {
        #[command(subcommand)]
        command: SiteCommands,
    },
    /// Follow the approval queue until interrupted
    Watch,
    /// Show the managed system's identity and activation state
    Info,
    /// Check connectivity to the control plane
    Ping,
    /// Write a commented configuration template
    InitConfig {
        /// Where to write the template
        #[arg(long, short, default_value = "vantage.toml")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum FeatureCommands {
    /// List every feature and its current state
    List,
    /// Set one feature on or off
    Set { name: String, state: OnOff },
}

#[derive(Subcommand)]
enum ApprovalCommands {
    /// List pending approval requests
    List,
    /// Approve a pending request (asks for administrator credentials)
    Approve {
        id: String,
        #[arg(long, short)]
        username: String,
        /// Read from the terminal when omitted
        #[arg(long, short)]
        password: Option<String>,
    },
    /// Deny a pending request (asks for administrator credentials)
    Deny {
        id: String,
        #[arg(long, short)]
        username: String,
        #[arg(long, short)]
        password: Option<String>,
    },
}

#[derive(Subcommand)]
enum SiteCommands {
    /// Show a site list
    List { list: ListKind },
    /// Add a site to a list
    Add { list: ListKind, site: String },
    /// Remove a site from a list
    Remove { list: ListKind, site: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ListKind {
    Whitelist,
    Blocklist,
}

impl From<ListKind> for SiteList {
    fn from(kind: ListKind) -> SiteList {
        match kind {
            ListKind::Whitelist => SiteList::Whitelist,
            ListKind::Blocklist => SiteList::Blocklist,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OnOff {
    On,
    Off,
}

impl From<OnOff> for bool {
    fn from(state: OnOff) -> bool {
        matches!(state, OnOff::On)
    }
}

fn init_cli_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn init_daemon_logging(config: &Config, verbose: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("could not create log directory {:?}", config.log_dir))?;
    let appender = tracing_appender::rolling::daily(&config.log_dir, "vantage-console.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    // keep the flush guard alive for the life of the process
    std::mem::forget(guard);

    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(())
}

fn build_control_plane(config: &Config, dry_run: bool) -> anyhow::Result<Arc<dyn ControlPlane>> {
    if dry_run {
        info!("dry-run mode, changes stay local");
        return Ok(Arc::new(MockControlPlane::new()));
    }
    let api = vantage_api::ConsoleApi::new(config.api.base_url.as_str(), config.timeout())
        .with_context(|| format!("invalid control plane URL {}", config.api.base_url))?;
    Ok(Arc::new(api))
}

fn print_outcome(outcome: &Outcome) {
    match outcome.severity {
        Severity::Error => eprintln!("error: {}", outcome.message),
        Severity::Warning => eprintln!("warning: {}", outcome.message),
        Severity::Info => println!("{}", outcome.message),
    }
}

fn read_password(provided: Option<String>) -> anyhow::Result<String> {
    if let Some(password) = provided {
        return Ok(password);
    }
    print!("administrator password: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn hydrated_reconciler(
    api: Arc<dyn ControlPlane>,
) -> anyhow::Result<Arc<ToggleReconciler>> {
    let reconciler = Arc::new(ToggleReconciler::new(api));
    for warning in reconciler.hydrate().await? {
        print_outcome(&warning);
    }
    Ok(reconciler)
}

async fn run_features(api: Arc<dyn ControlPlane>, command: FeatureCommands) -> anyhow::Result<()> {
    let session = Session::establish(api.as_ref()).await?;
    session.require_activation()?;
    let reconciler = hydrated_reconciler(api).await?;

    match command {
        FeatureCommands::List => {
            let snapshot = reconciler.snapshot().await;
            let state = |name: &str| {
                if snapshot.get(name).copied().unwrap_or(false) {
                    "on"
                } else {
                    "off"
                }
            };
            println!("Monitoring:");
            for name in MONITORING_FEATURES {
                println!("  [{:>3}] {name}", state(name));
            }
            println!("Restrictions:");
            for name in RESTRICTION_FEATURES {
                println!("  [{:>3}] {name}", state(name));
            }
        }
        FeatureCommands::Set { name, state } => {
            let outcome = reconciler.set_feature(&name, state.into()).await?;
            print_outcome(&outcome.to_outcome());
        }
    }
    Ok(())
}

async fn run_approvals(
    api: Arc<dyn ControlPlane>,
    command: ApprovalCommands,
) -> anyhow::Result<()> {
    let session = Session::establish(api.as_ref()).await?;
    session.require_activation()?;
    let reconciler = hydrated_reconciler(api.clone()).await?;
    let engine = ApprovalEngine::new(api, reconciler);

    match command {
        ApprovalCommands::List => {
            let pending = engine.refresh().await?;
            if pending.is_empty() {
                println!("no pending approval requests");
            }
            for ticket in pending {
                println!(
                    "{}  {}  {}",
                    ticket.id,
                    ticket.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                    ticket.message
                );
            }
        }
        ApprovalCommands::Approve { id, username, password } => {
            eprintln!("{DISRUPTION_WARNING}");
            let password = read_password(password)?;
            engine.refresh().await?;
            let outcome = engine
                .resolve(&id, ResolveAction::Approve, AdminCredential { username, password })
                .await?;
            print_outcome(&outcome.to_outcome());
        }
        ApprovalCommands::Deny { id, username, password } => {
            let password = read_password(password)?;
            engine.refresh().await?;
            let outcome = engine
                .resolve(&id, ResolveAction::Deny, AdminCredential { username, password })
                .await?;
            print_outcome(&outcome.to_outcome());
        }
    }
    Ok(())
}

async fn run_sites(api: Arc<dyn ControlPlane>, command: SiteCommands) -> anyhow::Result<()> {
    let session = Session::establish(api.as_ref()).await?;
    session.require_activation()?;

    let sites = match command {
        SiteCommands::List { list } => api.site_list(list.into()).await?,
        SiteCommands::Add { list, site } => api.add_site(list.into(), &site).await?,
        SiteCommands::Remove { list, site } => api.remove_site(list.into(), &site).await?,
    };
    if sites.is_empty() {
        println!("(empty)");
    }
    for site in sites {
        println!("{site}");
    }
    Ok(())
}

async fn run_watch(api: Arc<dyn ControlPlane>, config: &Config) -> anyhow::Result<()> {
    let session = Session::establish(api.as_ref()).await?;
    session.require_activation()?;
    let reconciler = hydrated_reconciler(api.clone()).await?;
    let engine = ApprovalEngine::new(api, reconciler);

    let handle = engine.start_polling(config.poll_interval());
    info!(interval_secs = config.poll_interval().as_secs(), "watching the approval queue");

    let mut last_seen: Vec<String> = Vec::new();
    let mut ticker = tokio::time::interval(config.poll_interval());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let pending = engine.pending().await;
                let ids: Vec<String> = pending.iter().map(|t| t.id.clone()).collect();
                if ids != last_seen {
                    for ticket in &pending {
                        println!(
                            "{}  {}  {}",
                            ticket.id,
                            ticket.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                            ticket.message
                        );
                    }
                    if pending.is_empty() {
                        println!("queue empty");
                    }
                    last_seen = ids;
                }
            }
        }
    }
    handle.stop();
    Ok(())
}

async fn run_info(api: Arc<dyn ControlPlane>) -> anyhow::Result<()> {
    let session = Session::establish(api.as_ref()).await?;
    println!("system id:  {}", session.system.system_id);
    println!(
        "activation: {}",
        if session.is_activated() { "activated" } else { "not activated" }
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    if matches!(cli.command, Commands::Watch) {
        init_daemon_logging(&config, cli.verbose)?;
    } else {
        init_cli_logging(cli.verbose);
    }

    let result = match cli.command {
        Commands::InitConfig { output } => {
            if output.exists() {
                anyhow::bail!("refusing to overwrite existing {:?}", output);
            }
            std::fs::write(&output, default_config_template())
                .with_context(|| format!("could not write {:?}", output))?;
            println!("wrote {:?}", output);
            Ok(())
        }
        Commands::Ping => {
            let api = build_control_plane(&config, cli.dry_run)?;
            api.ping().await?;
            println!("control plane reachable at {}", config.api.base_url);
            Ok(())
        }
        Commands::Info => {
            let api = build_control_plane(&config, cli.dry_run)?;
            run_info(api).await
        }
        Commands::Features { command } => {
            let api = build_control_plane(&config, cli.dry_run)?;
            run_features(api, command).await
        }
        Commands::Approvals { command } => {
            let api = build_control_plane(&config, cli.dry_run)?;
            run_approvals(api, command).await
        }
        Commands::Sites { command } => {
            let api = build_control_plane(&config, cli.dry_run)?;
            run_sites(api, command).await
        }
        Commands::Watch => {
            let api = build_control_plane(&config, cli.dry_run)?;
            run_watch(api, &config).await
        }
    };

    // core failures are presented as outcomes, not backtraces
    if let Err(err) = result {
        if let Some(console_err) = err.downcast_ref::<ConsoleError>() {
            print_outcome(&Outcome::from(console_err));
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn on_off_maps_to_bool() {
        assert!(bool::from(OnOff::On));
        assert!(!bool::from(OnOff::Off));
    }
}
