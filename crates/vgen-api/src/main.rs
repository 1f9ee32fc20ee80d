//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_api::{create_router, metrics, ApiConfig, AppState};
use vgen_queue::JobQueue;
use vgen_worker::{build_pipeline, Dispatcher, LivenessSweep, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vgen=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vgen-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let queue = match JobQueue::from_env().await {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to connect to job store: {}", e);
            std::process::exit(1);
        }
    };

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install metrics recorder: {}", e);
                None
            }
        }
    } else {
        None
    };

    let workers = if config.embedded_workers > 0 {
        match start_embedded_workers(config.embedded_workers, queue.clone()).await {
            Ok(workers) => Some(workers),
            Err(e) => {
                error!("Failed to start embedded workers: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address: {}", e);
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", addr);

    let app = create_router(AppState::new(config, queue), metrics_handle);
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        error!("Server error: {}", e);
    }

    if let Some((dispatcher, handles)) = workers {
        dispatcher.shutdown();
        for handle in handles {
            handle.await.ok();
        }
    }

    info!("Server shutdown complete");
}

/// Run a worker pool and liveness sweep inside this process.
async fn start_embedded_workers(
    loops: usize,
    queue: JobQueue,
) -> anyhow::Result<(Arc<Dispatcher>, Vec<JoinHandle<()>>)> {
    let mut config = WorkerConfig::from_env();
    config.max_concurrent_jobs = loops;
    config.validate().map_err(anyhow::Error::msg)?;

    let pipeline = build_pipeline(&config).await?;
    let sweep = LivenessSweep::new(queue.clone(), &config);
    let dispatcher = Arc::new(Dispatcher::new(config, queue, pipeline));
    info!("Running {} embedded worker loops", loops);

    let sweep_handle = tokio::spawn(sweep.run(dispatcher.subscribe_shutdown()));
    let pool_handle = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.run().await {
                error!("Embedded dispatcher error: {}", e);
            }
        })
    };

    Ok((dispatcher, vec![sweep_handle, pool_handle]))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
