//! dpbmgrd daemon and breakout command entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sonic_cfgmgr_common::{runner, CfgMgr};
use sonic_dpbmgrd::{
    submit_breakout, tables, BreakoutRequest, BreakoutStatus, DefaultsTemplate, DpbMgr,
    EngineConfig, PlatformCatalog, ReconciliationEngine, VirtualSwitch, VirtualSwitchConfig,
};
use sonic_orch_common::{wait_for_key, MemoryStore, ObjectStore, Presence, RedisConfig, RedisStore};
use sonic_portmgrd::{PortMgr, RecordingLink};

/// Dynamic port breakout manager
#[derive(Parser, Debug)]
#[command(name = "dpbmgrd")]
#[command(about = "SONiC dynamic port breakout manager")]
struct Cli {
    /// Redis server hostname
    #[arg(long, global = true, default_value = "127.0.0.1")]
    redis_host: String,

    /// Redis server port
    #[arg(long, global = true, default_value = "6379")]
    redis_port: u16,

    /// Use an in-memory store seeded from the platform catalog instead of Redis
    #[arg(long = "virtual", global = true)]
    virtual_store: bool,

    /// Platform catalog (platform.json)
    #[arg(long, global = true)]
    platform: Option<PathBuf>,

    /// Default bindings applied with --load-defaults
    #[arg(long, global = true)]
    defaults: Option<PathBuf>,

    /// Seconds a breakout waits for each stage to converge
    #[arg(long, global = true, default_value_t = 10)]
    convergence_timeout_secs: u64,

    /// Seconds the breakout command waits for the daemon to answer
    #[arg(long, global = true, default_value_t = 60)]
    request_timeout_secs: u64,

    /// Log filter (e.g. "info", "sonic_dpbmgrd=debug")
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Reconcile port configuration until interrupted
    Run,

    /// Change the breakout mode of a port
    Breakout {
        /// Root port of the breakout group (e.g. Ethernet0)
        port: String,

        /// Target mode (e.g. 4x25G[10G])
        mode: String,

        /// Remove dependencies of removed ports
        #[arg(short, long)]
        force: bool,

        /// Bind created ports per the defaults template
        #[arg(short, long)]
        load_defaults: bool,
    },
}

fn init_logging(filter: &str) {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });
    shutdown
}

async fn connect(cli: &Cli) -> anyhow::Result<Arc<dyn ObjectStore>> {
    if cli.virtual_store {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let config = RedisConfig::new(cli.redis_host.clone(), cli.redis_port);
    Ok(Arc::new(
        RedisStore::connect(config)
            .await
            .context("Failed to connect to Redis")?,
    ))
}

struct Setup {
    store: Arc<dyn ObjectStore>,
    engine: Arc<ReconciliationEngine>,
    catalog: PlatformCatalog,
}

async fn setup(cli: &Cli) -> anyhow::Result<Setup> {
    let catalog = match &cli.platform {
        Some(path) => PlatformCatalog::load(path)?,
        None => PlatformCatalog::default(),
    };
    let defaults = match &cli.defaults {
        Some(path) => DefaultsTemplate::load(path)?,
        None => DefaultsTemplate::default(),
    };
    let config = EngineConfig {
        convergence_timeout: Duration::from_secs(cli.convergence_timeout_secs),
        ..Default::default()
    };

    let store = connect(cli).await?;
    let device = Arc::new(VirtualSwitch::spawn(
        store.clone(),
        VirtualSwitchConfig {
            assert_gate: true,
            ..Default::default()
        },
    ));
    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        device,
        catalog.clone(),
        defaults,
        config,
    ));
    Ok(Setup { store, engine, catalog })
}

/// Writes the default-mode ports of every group and waits for them in hardware.
async fn seed_default_ports(setup: &Setup) -> anyhow::Result<()> {
    let ports = setup.catalog.default_ports()?;
    for port in &ports {
        setup
            .store
            .set(&tables::cfg_port(), &port.name, &port.to_config_fields())
            .await?;
    }
    let timeout = setup.engine.config().convergence_timeout;
    for port in &ports {
        let outcome = wait_for_key(
            setup.store.as_ref(),
            &tables::asic_port(),
            &port.name,
            Presence::Present,
            timeout,
        )
        .await?;
        if !outcome.is_ready() {
            bail!("Port {} did not reach hardware within {:?}", port.name, timeout);
        }
    }
    info!("Seeded {} ports", ports.len());
    Ok(())
}

async fn run_daemon(cli: Cli) -> anyhow::Result<()> {
    let setup = setup(&cli).await?;
    let shutdown = shutdown_on_ctrl_c();

    let mut mgr = DpbMgr::new(setup.engine.clone());
    info!("Subscribing to tables: {:?}", mgr.subscriptions());

    if cli.virtual_store {
        let store = setup.store.clone();
        let token = shutdown.clone();
        let reconciler = tokio::spawn(async move { runner::run(&mut mgr, store, token).await });
        seed_default_ports(&setup).await?;
        reconciler.await.context("Reconciler task failed")??;
    } else {
        runner::run(&mut mgr, setup.store.clone(), shutdown).await?;
    }
    Ok(())
}

/// Hands `request` to the daemon and reports its outcome.
async fn submit(store: &dyn ObjectStore, request: &BreakoutRequest, timeout: Duration) -> anyhow::Result<()> {
    match submit_breakout(store, request, timeout).await? {
        BreakoutStatus::Completed(report) => {
            println!("{}", report);
            Ok(())
        }
        BreakoutStatus::Failed(error) => bail!("Breakout of {} failed: {}", request.port, error),
    }
}

async fn run_breakout(cli: Cli, request: BreakoutRequest) -> anyhow::Result<()> {
    let timeout = Duration::from_secs(cli.request_timeout_secs);

    if !cli.virtual_store {
        let store = connect(&cli).await?;
        return submit(store.as_ref(), &request, timeout).await;
    }

    let setup = setup(&cli).await?;
    let shutdown = CancellationToken::new();
    let mut mgr = DpbMgr::new(setup.engine.clone());
    let store = setup.store.clone();
    let token = shutdown.clone();
    let reconciler = tokio::spawn(async move { runner::run(&mut mgr, store, token).await });

    let mut gate = PortMgr::new(setup.store.clone(), Arc::new(RecordingLink::new()));
    let store = setup.store.clone();
    let token = shutdown.clone();
    let gate_task = tokio::spawn(async move { runner::run(&mut gate, store, token).await });

    seed_default_ports(&setup).await?;
    let result = submit(setup.store.as_ref(), &request, timeout).await;

    shutdown.cancel();
    reconciler.await.context("Reconciler task failed")??;
    gate_task.await.context("Port manager task failed")??;

    result?;
    let mut hardware = setup.store.keys(&tables::asic_port()).await?;
    hardware.sort();
    println!("hardware ports: {}", hardware.join(", "));
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!("--- Starting dpbmgrd (Rust) ---");

    let result = match cli.command.clone() {
        Command::Run => run_daemon(cli).await,
        Command::Breakout {
            port,
            mode,
            force,
            load_defaults,
        } => {
            let request = BreakoutRequest::new(port, mode)
                .force(force)
                .load_defaults(load_defaults);
            run_breakout(cli, request).await
        }
    };

    match result {
        Ok(()) => {
            info!("dpbmgrd exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("dpbmgrd error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
