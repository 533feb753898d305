use posture_engine::{
    api::{build_router, AppState},
    config::Config,
    scoring::PostureScorer,
    state::create_store,
    suppression::SuppressionManager,
    sync::DeltaSyncEngine,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        default_config()
    });

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "posture_engine={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Posture Engine v{}", env!("CARGO_PKG_VERSION"));

    // Initialize storage backend
    tracing::info!("Storage backend: {:?}", config.state.backend);
    let stores = create_store(&config.state)?;

    // Wire the reconciliation and scoring components
    let engine = Arc::new(DeltaSyncEngine::new(
        stores.findings.clone(),
        stores.snapshots.clone(),
        config.sync.clone(),
    ));
    let suppression = Arc::new(SuppressionManager::new(stores.findings.clone()));
    let scorer = Arc::new(PostureScorer::new(
        stores.findings.clone(),
        stores.snapshots.clone(),
        config.scoring.total_scannable_services,
    ));

    let app_state = AppState::new(engine, suppression, scorer, stores.findings.clone());
    let app = build_router(app_state);

    // Start HTTP server
    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Scan ingestion: http://{}/v1/scans/sync", http_addr);
    tracing::info!("   Posture score: http://{}/v1/posture/score", http_addr);

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
    Ok(())
}

fn default_config() -> Config {
    Config {
        server: Default::default(),
        state: Default::default(),
        sync: Default::default(),
        scoring: Default::default(),
        observability: Default::default(),
    }
}
