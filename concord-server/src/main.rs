// Concord - checks two segmentation models against user-drawn regions

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use concord_core::RunLog;
use concord_server::config::ServerConfig;
use concord_server::http::{create_router, ApiState};
use concord_server::jobs::JobRegistry;
use concord_server::pipeline::PipelineContext;
use concord_vision::{AutoMaskGenerator, InstanceSegmenter};

/// Command line options
#[derive(Parser, Debug)]
#[command(name = "concord-server", version, about = "Segmentation agreement service")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// HTTP port override
    #[arg(long)]
    port: Option<u16>,
    /// Data directory override
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Model directory override
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("🚀 Starting Concord...");

    let args = Args::parse();
    let config = load_config(&args)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    // Prepare data directory and run history
    info!("📁 Preparing data directory...");
    std::fs::create_dir_all(config.data_dir.join("runs"))?;
    let history = Arc::new(RunLog::open(config.data_dir.join("history.csv")));
    // Fail fast on a foreign or corrupt history file instead of at first run.
    let trend = history.recompute_trend()?;
    info!("✅ Run history ready ({} prior runs)", trend.runs);

    // Load segmentation models
    info!("🧠 Loading segmentation models...");
    let auto = AutoMaskGenerator::new(&config.vision.model_dir, config.vision.auto.clone())?;
    info!("✅ Automatic mask generator ready");
    let instance = InstanceSegmenter::new(&config.vision.model_dir, config.vision.instance.clone())?;
    info!("✅ Instance segmenter ready");

    let pipeline = Arc::new(PipelineContext {
        auto: Arc::new(auto),
        instance: Arc::new(instance),
        history,
        data_dir: config.data_dir.clone(),
    });
    let registry = Arc::new(JobRegistry::new(config.max_jobs));

    // Start HTTP server
    let server = start_http_server(
        config.http_port,
        ApiState {
            registry,
            pipeline,
        },
    )
    .await?;

    print_ready_message(&config);

    // Wait for shutdown signal
    wait_for_shutdown().await;

    info!("🔄 Stopping services...");
    server.abort();
    info!("👋 Concord stopped");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("📖 Loading configuration from {}", path.display());
            ServerConfig::from_file(path).map_err(|e| anyhow::anyhow!(e))?
        }
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &args.model_dir {
        config.vision.model_dir = dir.clone();
    }
    Ok(config)
}

/// Start HTTP server
async fn start_http_server(
    port: u16,
    state: ApiState,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use std::net::SocketAddr;

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("🌐 Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = tokio::spawn(async move {
        info!("✅ HTTP server listening on http://{}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server failed: {}", e);
        }
    });

    Ok(server)
}

/// Print ready message
fn print_ready_message(config: &ServerConfig) {
    println!();
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║                                                           ║");
    println!("║     ✅  CONCORD IS READY!  ✅                             ║");
    println!("║                                                           ║");
    println!("║     🌐 HTTP API:       http://localhost:{}              ║", config.http_port);
    println!("║     🩺 Health check:   /health                            ║");
    println!("║     🎨 Submit runs:    POST /api/v1/runs                  ║");
    println!("║                                                           ║");
    println!("║     💾 Data directory: {}                                 ║", config.data_dir.display());
    println!("║                                                           ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
}

/// Wait for shutdown signal
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("🛑 Shutdown signal received");
}
