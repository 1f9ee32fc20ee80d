//! Video generation worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_media::{check_ffmpeg, check_ffprobe};
use vgen_queue::JobQueue;
use vgen_worker::metrics::init_metrics;
use vgen_worker::{build_pipeline, Dispatcher, LivenessSweep, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vgen=info".parse().unwrap())
        .add_directive("aws_config=warn".parse().unwrap());

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

    info!("Starting vgen-worker");

    let config = WorkerConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid worker config: {}", e);
        std::process::exit(1);
    }
    info!("Worker config: {:?}", config);

    if let Err(e) = check_ffmpeg().and_then(|_| check_ffprobe()) {
        error!("FFmpeg toolchain unavailable: {}", e);
        std::process::exit(1);
    }

    if let Ok(port) = std::env::var("METRICS_PORT") {
        match port.parse::<u16>() {
            Ok(port) => {
                if let Err(e) = init_metrics(SocketAddr::from(([0, 0, 0, 0], port))) {
                    warn!("Failed to start metrics exporter: {}", e);
                }
            }
            Err(_) => warn!("Ignoring invalid METRICS_PORT '{}'", port),
        }
    }

    let queue = match JobQueue::from_env().await {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to connect to job store: {}", e);
            std::process::exit(1);
        }
    };

    let pipeline = match build_pipeline(&config).await {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to build pipeline: {}", e);
            std::process::exit(1);
        }
    };

    let sweep = LivenessSweep::new(queue.clone(), &config);
    let dispatcher = Arc::new(Dispatcher::new(config, queue, pipeline));
    let sweep_handle = tokio::spawn(sweep.run(dispatcher.subscribe_shutdown()));

    {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            dispatcher.shutdown();
        });
    }

    if let Err(e) = dispatcher.run().await {
        error!("Dispatcher error: {}", e);
        std::process::exit(1);
    }

    sweep_handle.await.ok();
    info!("Worker shutdown complete");
}
