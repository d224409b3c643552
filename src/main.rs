// ABOUTME: Entry point for the drydock CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use drydock::config::Config;
use drydock::error::{Error, Result};
use drydock::runtime::{
    BollardRuntime, ContainerError, ContainerOps, HealthState, ImageOps, InMemoryRuntime, Timed,
    detect_runtime,
};
use drydock::store::{BackupStore, OperationStore, Status, UpdateOperation};
use drydock::types::{ContainerName, ImageRef};
use drydock::update::{LogOutcome, OutcomeRegistry, UpdateController, UpdateRequest};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // -v forces debug; otherwise RUST_LOG, falling back to info
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Update {
            container,
            image,
            trigger,
            dry_run,
        } => {
            let request = UpdateRequest::new(
                ContainerName::new(&container)?,
                ImageRef::parse(&image)?,
                trigger,
            );
            let runtime = connect(&config).await?;
            if dry_run {
                simulate(config, &runtime, request).await
            } else {
                update(config, runtime, request).await
            }
        }
        Commands::Recover => {
            let runtime = connect(&config).await?;
            let controller = build_controller(config, runtime)?;
            let recovered = controller.recover(&shutdown_token()).await?;
            if recovered.is_empty() {
                println!("Nothing to recover");
            }
            for op in &recovered {
                print_outcome(op);
            }
            Ok(())
        }
        Commands::History { container, json } => history(&config, &container, json),
        Commands::Backups { container } => backups(&config, &container),
        Commands::Prune { container, keep } => {
            let name = ContainerName::new(&container)?;
            let store = BackupStore::open(&config.state_dir)?;
            let removed = store.prune_old_backups(&name, keep.unwrap_or(config.backup.retention))?;
            println!("Removed {removed} backup(s) for {name}");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::discover_or_default(&env::current_dir()?)?,
    };
    Ok(config.with_env_overrides())
}

async fn connect(config: &Config) -> Result<Timed<BollardRuntime>> {
    let info = detect_runtime(&config.runtime)?;
    tracing::debug!(runtime = %info.runtime_type, socket = %info.socket_path, "detected runtime");
    let runtime = BollardRuntime::connect(&info).await?;
    Ok(Timed::new(runtime, config.call_timeout).with_pull_timeout(config.pull_timeout))
}

fn build_controller<R: ContainerOps + ImageOps>(
    config: Config,
    runtime: R,
) -> Result<UpdateController<R>> {
    let operations = Arc::new(OperationStore::open(&config.state_dir)?);
    let backups = Arc::new(BackupStore::open(&config.state_dir)?);
    let outcomes = OutcomeRegistry::new();
    outcomes.register(Arc::new(LogOutcome));
    Ok(UpdateController::new(runtime, operations, backups, config).with_outcomes(outcomes))
}

/// Cancelled on Ctrl-C so hooks are killed and health polling stops.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, winding down");
            child.cancel();
        }
    });
    token
}

async fn update<R: ContainerOps + ImageOps>(
    config: Config,
    runtime: R,
    request: UpdateRequest,
) -> Result<()> {
    let controller = build_controller(config, runtime)?;
    let cancel = shutdown_token();

    // Settle anything a previous run left behind before starting a new swap.
    controller.recover(&cancel).await?;

    println!(
        "Updating {} to {}",
        request.container_name, request.target_image
    );
    let op = controller.update(request, &cancel).await?;
    print_outcome(&op);

    if op.status == Status::Success {
        Ok(())
    } else {
        Err(Error::UpdateUnsuccessful {
            container: op.container_name.to_string(),
            status: op.status.to_string(),
            reason: op.reason.unwrap_or_default(),
        })
    }
}

/// Run the update against an in-memory copy of the container.
async fn simulate<R: ContainerOps>(
    mut config: Config,
    runtime: &R,
    request: UpdateRequest,
) -> Result<()> {
    let Some(info) = runtime
        .find_container(request.container_name.as_str())
        .await?
    else {
        return Err(ContainerError::NotFound(request.container_name.to_string()).into());
    };

    let copy = InMemoryRuntime::new();
    let _id = copy.add_container(
        request.container_name.as_str(),
        info.spec.clone(),
        info.is_running(),
    );
    copy.set_health_on_start(info.spec.healthcheck.as_ref().map(|_| HealthState::Healthy));
    config.health.interval = Duration::from_millis(10);
    config.health.stable_period = Duration::ZERO;

    let controller = UpdateController::new(
        copy.clone(),
        Arc::new(OperationStore::in_memory()),
        Arc::new(BackupStore::in_memory()),
        config,
    )
    .without_hooks();

    println!(
        "Dry run: {} to {} (hooks skipped)",
        request.container_name, request.target_image
    );
    let op = controller.update(request, &CancellationToken::new()).await?;
    for record in copy.mutation_calls() {
        println!("  {:?} {}", record.call, record.target);
    }
    println!("Would end {} in phase {}", op.status, op.phase);
    Ok(())
}

fn print_outcome(op: &UpdateOperation) {
    println!(
        "{} {}: {} (phase {})",
        op.id.short(),
        op.container_name,
        op.status,
        op.phase
    );
    if let Some(reason) = &op.reason {
        println!("  reason: {reason}");
    }
    for warning in &op.hook_warnings {
        println!("  hook warning: {warning}");
    }
}

fn history(config: &Config, container: &str, json: bool) -> Result<()> {
    let name = ContainerName::new(container)?;
    let store = OperationStore::open(&config.state_dir)?;
    let ops = store.history(&name);

    if json {
        println!("{}", serde_json::to_string_pretty(&ops)?);
        return Ok(());
    }
    if ops.is_empty() {
        println!("No updates recorded for {name}");
        return Ok(());
    }
    for op in &ops {
        println!(
            "{}  {}  {:<12} {:<13} {}",
            op.updated_at.format("%Y-%m-%d %H:%M:%S"),
            op.id.short(),
            op.status.as_str(),
            op.phase.as_str(),
            op.target_image
        );
        if let Some(reason) = &op.reason {
            println!("    reason: {reason}");
        }
        for warning in &op.hook_warnings {
            println!("    hook warning: {warning}");
        }
    }
    Ok(())
}

fn backups(config: &Config, container: &str) -> Result<()> {
    let name = ContainerName::new(container)?;
    let store = BackupStore::open(&config.state_dir)?;
    let backups = store.by_container_name(&name);

    if backups.is_empty() {
        println!("No backups for {name}");
        return Ok(());
    }
    for backup in &backups {
        println!(
            "{}  {}  {}  {}{}",
            backup.timestamp.format("%Y-%m-%d %H:%M:%S"),
            backup.id.short(),
            backup.image,
            backup.image_id,
            if backup.was_running { "" } else { "  (stopped)" }
        );
    }
    Ok(())
}
