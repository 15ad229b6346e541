//! `serve` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use contracts::GatewayConfig;

use super::load_config;
use crate::cli::ServeArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `serve` command
pub async fn run_serve(args: &ServeArgs) -> Result<()> {
    match &args.config {
        Some(path) => info!(config = %path.display(), "Loading configuration"),
        None => info!("No configuration file given, using defaults"),
    }
    let mut gateway = load_config(args.config.as_deref())?;

    // Apply CLI overrides
    if let Some(ref host) = args.host {
        info!(host = %host, "Overriding listen host from CLI");
        gateway.server.host = host.clone();
    }
    if let Some(port) = args.port {
        info!(port = %port, "Overriding listen port from CLI");
        gateway.server.port = port;
    }

    info!(
        host = %gateway.server.host,
        port = gateway.server.port,
        max_queue_size = gateway.backpressure.max_queue_size,
        brand_packs = gateway.dictionaries.brand_packs.len(),
        sinks = gateway.sinks.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        can_decoder::DecoderContext::from_config(&gateway.dictionaries)
            .context("Failed to load CAN dictionaries")?;
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&gateway);
        return Ok(());
    }

    let pipeline = Pipeline::new(PipelineConfig {
        gateway,
        stats_interval: (args.stats_interval > 0)
            .then(|| Duration::from_secs(args.stats_interval)),
        persist_only: args.persist_only,
    });

    info!("Starting gateway...");
    let stats = pipeline
        .run(async {
            shutdown_signal().await;
            warn!("Received shutdown signal, stopping gateway...");
        })
        .await
        .context("Gateway execution failed")?;

    info!(
        frames = stats.ingestion.frames_received,
        acks = stats.ingestion.acks_sent,
        nacks = stats.ingestion.nacks_sent,
        duration_secs = stats.duration.as_secs_f64(),
        "Gateway stopped"
    );
    stats.print_summary();

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(gateway: &GatewayConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Server:");
    println!("  Listen: {}:{}", gateway.server.host, gateway.server.port);
    println!(
        "  Timeouts: read {} ms, idle {} ms",
        gateway.server.read_timeout_ms, gateway.server.idle_timeout_ms
    );
    println!("  Max frame size: {} bytes", gateway.framing.max_frame_size);

    println!("\nBackpressure:");
    println!(
        "  Queue: {} per stream, soft limit at {:.0}%",
        gateway.backpressure.max_queue_size,
        gateway.backpressure.drop_threshold_ratio * 100.0
    );
    if gateway.rate_limit.enabled {
        println!(
            "  Rate limit: {} CAN frames/min per device",
            gateway.rate_limit.max_frames_per_minute
        );
    }

    println!("\nDictionaries:");
    let path_or_builtin = |path: &Option<std::path::PathBuf>| {
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in".to_string())
    };
    println!("  J1939: {}", path_or_builtin(&gateway.dictionaries.j1939));
    println!("  OBD-II: {}", path_or_builtin(&gateway.dictionaries.obd2));
    for pack in &gateway.dictionaries.brand_packs {
        println!("  Brand pack {}: {}", pack.name, pack.path.display());
    }

    if !gateway.sinks.is_empty() {
        println!("\nSinks ({}):", gateway.sinks.len());
        for sink in &gateway.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}
