//! Bay - main entry point.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use bay::affinity::AffinityIndex;
use bay::config::BayConfig;
use bay::driver::{ContainerDriver, DockerDriver};
use bay::health::HttpHealthProber;
use bay::http::{AppState, BayApi};
use bay::proxy::OperationRouter;
use bay::reaper::{ReaperHandle, TtlReaper};
use bay::recovery;
use bay::repository::{InMemoryShipRepository, ShipRepository, SqliteShipRepository};
use bay::scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(name = "bay")]
#[command(about = "Control plane for container-backed agent execution sandboxes")]
#[command(version)]
struct Args {
    /// Bind address (overrides BAY_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides BAY_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Keep fleet state in memory instead of the database (for testing)
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bay=info,tower_http=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Bay...");

    let mut config = BayConfig::resolve()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    tracing::info!(
        max_ship_num = config.max_ship_num,
        behavior_after_max_ship = config.behavior_after_max_ship.as_str(),
        "Loaded configuration"
    );

    let repo: Arc<dyn ShipRepository> = if args.ephemeral {
        tracing::warn!("Running with in-memory fleet state; nothing survives a restart");
        Arc::new(InMemoryShipRepository::new())
    } else {
        Arc::new(SqliteShipRepository::connect(&config.database_url).await?)
    };
    tracing::info!("Database initialized");

    let driver: Arc<dyn ContainerDriver> = Arc::new(
        DockerDriver::connect(config.docker_image.clone(), config.docker_network.clone()).await?,
    );
    tracing::info!(image = %config.docker_image, network = %config.docker_network, "Docker driver connected");

    let client = reqwest::Client::new();
    let prober = Arc::new(HttpHealthProber::new(
        client.clone(),
        config.health_check_interval,
    ));
    let affinity = Arc::new(AffinityIndex::new(repo.clone()));
    let reaper_handle = Arc::new(ReaperHandle::new());

    let scheduler = Arc::new(Scheduler::new(
        config.clone(),
        driver.clone(),
        repo.clone(),
        affinity.clone(),
        prober.clone(),
        reaper_handle.clone(),
    ));

    // Reconcile persisted records with whatever containers actually
    // survived, then seed the live-count from the result.
    let report = recovery::recover(
        repo.clone(),
        driver.clone(),
        affinity.clone(),
        prober.clone(),
        reaper_handle.clone(),
    )
    .await?;
    scheduler.set_live_count(report.restored).await;

    let shutdown = CancellationToken::new();
    let reaper = TtlReaper::new(scheduler.clone(), repo.clone(), reaper_handle);
    tokio::spawn(reaper.run(shutdown.clone()));

    let state = AppState {
        scheduler,
        ops: Arc::new(OperationRouter::new(
            repo,
            affinity,
            client,
            config.exec_timeout,
        )),
        access_token: config.access_token.clone(),
    };

    let result = BayApi::start(state, &config.host, config.port).await;
    shutdown.cancel();
    result.map_err(|e| anyhow::anyhow!(e))
}
