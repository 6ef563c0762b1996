//! portmgrd daemon entry point.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sonic_cfgmgr_common::{runner, CfgMgr};
use sonic_orch_common::{ObjectStore, RedisConfig, RedisStore};
use sonic_portmgrd::{IpLink, PortMgr};

/// Port configuration manager daemon
#[derive(Parser, Debug)]
#[command(name = "portmgrd")]
#[command(about = "SONiC port kernel settings manager")]
struct Args {
    /// Redis server hostname
    #[arg(long, default_value = "127.0.0.1")]
    redis_host: String,

    /// Redis server port
    #[arg(long, default_value = "6379")]
    redis_port: u16,

    /// Log filter (e.g. "info", "sonic_portmgrd=debug")
    #[arg(long, default_value = "info")]
    log_level: String,
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

async fn run(args: Args) -> anyhow::Result<()> {
    let config = RedisConfig::new(args.redis_host, args.redis_port);
    let store: Arc<dyn ObjectStore> = Arc::new(
        RedisStore::connect(config)
            .await
            .context("Failed to connect to Redis")?,
    );

    let mut mgr = PortMgr::new(store.clone(), Arc::new(IpLink));
    info!("Subscribing to tables: {:?}", mgr.subscriptions());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    runner::run(&mut mgr, store, shutdown).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("--- Starting portmgrd (Rust) ---");

    match run(args).await {
        Ok(()) => {
            info!("portmgrd exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("portmgrd error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
