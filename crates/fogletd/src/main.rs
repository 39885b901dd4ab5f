//! The foglet agent daemon.
//!
//! ```text
//! fogletd --config /etc/foglet/foglet.toml
//! fogletd --port 54321 --data-dir /var/lib/foglet
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use foglet_core::AgentConfig;
use foglet_runtime::DockerRuntime;

use fogletd::agent::Agent;
use fogletd::dispatcher::run_dispatcher;
use fogletd::logging;
use fogletd::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "fogletd", about = "foglet edge agent daemon")]
struct Cli {
    /// Path to the agent configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local API port (overrides the config file).
    #[arg(long)]
    port: Option<u16>,

    /// Data directory (overrides the config file).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AgentConfig::from_file(path)?,
        None => AgentConfig::default(),
    };
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.connector.trust_store_dir = data_dir.join("trust-stores");
        config.agent.data_dir = data_dir;
    }

    run(config).await
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    info!("foglet agent starting");
    std::fs::create_dir_all(&config.agent.data_dir)?;

    // ── Build the agent context ────────────────────────────────────
    let runtime = Arc::new(DockerRuntime::connect()?);
    info!("container runtime connected");

    let mut agent = Agent::build(config, runtime);
    let task_rx = agent.task_rx.take().expect("task queue consumer");

    // ── Start the routing core ─────────────────────────────────────
    agent.router.start().await?;

    // ── Shutdown signal ────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Supervised modules ─────────────────────────────────────────
    let mut supervisor = Supervisor::new(agent.status.clone(), shutdown_rx.clone());

    let router = agent.router.clone();
    let watchdog_interval = Duration::from_secs(agent.config.routing.watchdog_interval_secs);
    let watchdog_shutdown = shutdown_rx.clone();
    supervisor.supervise("routing-watchdog", move || {
        let router = router.clone();
        let shutdown = watchdog_shutdown.clone();
        async move {
            foglet_routing::run_watchdog(router, watchdog_interval, shutdown).await;
            Ok(())
        }
    });

    let status = agent.status.clone();
    let speed_interval = Duration::from_secs(agent.config.routing.speed_interval_minutes * 60);
    let sampler_shutdown = shutdown_rx.clone();
    supervisor.supervise("speed-sampler", move || {
        let status = status.clone();
        let shutdown = sampler_shutdown.clone();
        async move {
            foglet_routing::run_speed_sampler(status, speed_interval, shutdown).await;
            Ok(())
        }
    });

    let lifecycle = agent.lifecycle.clone();
    let dispatch_status = agent.status.clone();
    let dispatcher_shutdown = shutdown_rx.clone();
    let task_rx = Arc::new(tokio::sync::Mutex::new(Some(task_rx)));
    supervisor.supervise("lifecycle-dispatcher", move || {
        let lifecycle = lifecycle.clone();
        let status = dispatch_status.clone();
        let shutdown = dispatcher_shutdown.clone();
        let task_rx = task_rx.clone();
        async move {
            let Some(tasks) = task_rx.lock().await.take() else {
                // The queue consumer is gone; nothing left to do.
                return Ok(());
            };
            run_dispatcher(lifecycle, status, tasks, shutdown).await
        }
    });

    // ── Local API server ───────────────────────────────────────────
    let api_router = foglet_api::build_router(agent.api_state());
    let addr = SocketAddr::from(([0, 0, 0, 0], agent.config.api.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "local api listening");

    let server = axum::serve(listener, api_router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
    server.await?;

    // ── Drain ──────────────────────────────────────────────────────
    supervisor.join_all().await;
    agent.router.stop().await;
    agent.connectors.close_all().await;

    info!("foglet agent stopped");
    Ok(())
}
