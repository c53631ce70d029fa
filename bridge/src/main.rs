use bridge::broadcast::Broadcaster;
use bridge::config::Config;
use bridge::ingest::{Ingestor, Pipeline};
use bridge::metrics;
use bridge::registry::SubscriberRegistry;
use bridge::rest::{self, AppState};
use bridge::serial::SerialOpener;
use bridge::shutdown;
use bridge::storage::CsvLog;
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(2);
    }

    info!("Starting serial telemetry bridge");
    match config.serial_port.as_deref().filter(|p| !p.is_empty()) {
        Some(port) => info!("Serial: {} @ {}", port, config.baud),
        None => info!("Serial: auto-select @ {}", config.baud),
    }
    info!("HTTP server: {}", config.http_addr);

    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
    }

    let log = match CsvLog::in_dir(&config.data_dir) {
        Ok(log) => log,
        Err(e) => {
            error!("Cannot use data dir {}: {}", config.data_dir.display(), e);
            std::process::exit(1);
        }
    };
    info!("Log file: {}", log.path().display());

    let registry = SubscriberRegistry::new();
    let pipeline = Pipeline::new(
        log.clone(),
        Broadcaster::new(registry.clone()),
        config.on_persist_error,
    );
    let opener = SerialOpener {
        baud_rate: config.baud,
        read_timeout: config.read_timeout(),
    };
    let ingestor = Ingestor::new(opener, config.ingest(), pipeline);
    let ingest_state = ingestor.state();

    let token = CancellationToken::new();
    let ingest_handle = tokio::spawn(ingestor.run(token.clone()));

    let mut state = AppState::new(
        registry,
        log.path().to_path_buf(),
        ingest_state,
        config.subscriber_buffer,
    );
    if let Some(page) = &config.index_page {
        match std::fs::read_to_string(page) {
            Ok(html) => state = state.with_index_page(html),
            Err(e) => warn!("Cannot read {}, using built-in page: {}", page.display(), e),
        }
    }

    let app = rest::create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let grace = config.read_timeout() * 3 + Duration::from_secs(1);
    let exit = shutdown::supervise(ingest_handle, server_handle, shutdown_signal, token, grace).await;

    info!("Shutting down ({:?})", exit);
    ExitCode::from(exit.code())
}
