use cmdb_report_analytics::{
    analytics::{Aggregator, SledSnapshotRepository},
    api::{build_router_with, AppState},
    config::Config,
    scheduler::RefreshScheduler,
    state::create_store,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "cmdb_report_analytics={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    init_tracing(&config);
    tracing::info!(
        "Starting {} v{}",
        config.observability.service_name,
        env!("CARGO_PKG_VERSION")
    );

    run(config)
}

/// Run the service until ctrl-c.
///
/// The analytics runtime is owned out here, outside any async context, so
/// it can be torn down on every exit path.
fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // Recompute passes run on their own workers, apart from request handling
    let analytics_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.analytics.worker_threads.max(1))
        .thread_name("analytics-worker")
        .enable_all()
        .build()?;

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(config, analytics_runtime.handle().clone()));

    analytics_runtime.shutdown_background();
    result
}

async fn serve(config: Config, analytics: Handle) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = cmdb_report_analytics::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        }
    } else {
        tracing::info!("Prometheus metrics disabled in configuration");
    }

    // Initialize storage backend
    tracing::info!("Storage backend: {:?}", config.state.backend);
    let store = create_store(&config.state)?;

    let mut builder = Aggregator::builder(store)
        .config(config.analytics.clone())
        .runtime(analytics);
    if let Some(path) = config.state.snapshot_path() {
        tracing::info!(path = ?path, "Persisting view snapshots");
        builder = builder.repository(Arc::new(SledSnapshotRepository::new(path)?));
    }
    let aggregator = builder.build()?;

    let scheduler = Arc::new(RefreshScheduler::new(aggregator, config.scheduler.clone())?);
    scheduler.start().await?;

    let app = build_router_with(
        AppState::new(scheduler.clone()),
        &config.server,
        config.metrics.clone(),
    );

    // Start HTTP server
    let http_addr = config.server.bind_address();
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Views: http://{}/v1/views", http_addr);
    tracing::info!("   Metrics: http://{}/metrics", http_addr);

    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Failed to stop refresh scheduler: {}", e);
    }
    Ok(())
}
