//! Pipeline orchestrator - wires decoder, ingestion, gate and sinks together.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use can_decoder::{DecoderContext, J1939_SLOT, OBD2_SLOT};
use contracts::{DictionariesConfig, GatewayConfig, RecordKind};
use dispatcher::{create_sink_handles, BatchWriterPool};
use ingestion::{IngestContext, TcpServer};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::PipelineStats;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Effective gateway configuration, CLI overrides applied
    pub gateway: GatewayConfig,

    /// Period of queue depth reports (None = disabled)
    pub stats_interval: Option<Duration>,

    /// Start with persist-only forced on
    pub persist_only: bool,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Serve until `shutdown` resolves, then drain queues and close sinks.
    ///
    /// SIGHUP reloads every configured dictionary in place.
    #[instrument(name = "gateway_pipeline", skip_all)]
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let gateway = self.config.gateway;

        let decoder = Arc::new(
            DecoderContext::from_config(&gateway.dictionaries)
                .context("Failed to load CAN dictionaries")?,
        );
        info!(
            j1939 = ?decoder.version(J1939_SLOT),
            obd2 = ?decoder.version(OBD2_SLOT),
            brand_packs = ?decoder.brand_packs(),
            "Dictionaries loaded"
        );

        let ctx = IngestContext::new(gateway.clone(), Arc::clone(&decoder));
        if self.config.persist_only {
            ctx.gate.force_persist_only(true);
        }

        if gateway.sinks.is_empty() {
            warn!("No sinks configured - records will be discarded after batching");
        }
        let sinks = create_sink_handles(&gateway.sinks).context("Failed to create sinks")?;
        let active_sinks = sinks.len();
        let writers = BatchWriterPool::spawn(
            Arc::clone(&ctx.gate),
            &RecordKind::ALL,
            sinks,
            &gateway.batch,
        );

        let server = match TcpServer::bind(ctx.clone()).await {
            Ok(server) => server,
            Err(e) => {
                writers.shutdown().await;
                return Err(e).context("Failed to start TCP server");
            }
        };
        let addr = server.local_addr()?;
        info!(addr = %addr, sinks = active_sinks, "Gateway listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut server_task = tokio::spawn(server.run(shutdown_rx));

        let mut reload = ReloadSignal::install()?;
        let mut reloads = 0usize;
        let mut ticker = self.config.stats_interval.map(tokio::time::interval);
        tokio::pin!(shutdown);

        let server_result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing connections");
                    let _ = shutdown_tx.send(true);
                    break (&mut server_task).await;
                }
                joined = &mut server_task => {
                    break joined;
                }
                _ = reload.recv() => {
                    reloads += 1;
                    reload_dictionaries(&decoder, &gateway.dictionaries);
                }
                _ = tick(&mut ticker) => {
                    report_progress(&ctx);
                }
            }
        };

        let pending: usize = ctx.gate.snapshot().iter().map(|q| q.len).sum();
        info!(pending, "Draining queues");
        let writer_summary = writers.shutdown().await;

        let stats = PipelineStats {
            duration: start_time.elapsed(),
            ingestion: ctx.metrics.snapshot(),
            queues: ctx.gate.snapshot(),
            tp: ctx.reassembler.stats(),
            batches_flushed: writer_summary.batches_flushed,
            sinks: writer_summary.sinks,
            dictionary_reloads: reloads,
        };

        match server_result {
            Ok(Ok(())) => Ok(stats),
            Ok(Err(e)) => Err(e).context("TCP server failed"),
            Err(e) => {
                error!(error = ?e, "TCP server task panicked");
                Err(e).context("TCP server task panicked")
            }
        }
    }
}

/// Reload every configured dictionary; failures keep the previous tables
fn reload_dictionaries(decoder: &DecoderContext, config: &DictionariesConfig) {
    let outcomes = decoder.reload_configured(config);
    if outcomes.is_empty() {
        info!("SIGHUP received but no dictionary files are configured");
        return;
    }
    for (slot, outcome) in outcomes {
        match outcome {
            Ok(version) => info!(slot = %slot, version = %version, "Dictionary reloaded"),
            Err(e) => warn!(slot = %slot, error = %e, "Dictionary reload failed, keeping previous"),
        }
    }
}

/// Publish queue depths and log a one-line progress report
fn report_progress(ctx: &IngestContext) {
    let queues = ctx.gate.snapshot();
    for queue in &queues {
        observability::record_queue_depth(queue.stream, queue.len);
    }
    let snapshot = ctx.metrics.snapshot();
    info!(
        connections = snapshot.connections_active,
        frames = snapshot.frames_received,
        nacks = snapshot.nacks_sent,
        enqueued = snapshot.records_enqueued,
        dropped = snapshot.records_dropped,
        queued = queues.iter().map(|q| q.len).sum::<usize>(),
        tp_active = ctx.reassembler.session_count(),
        persist_only = ctx.gate.should_persist_only(),
        "Gateway progress"
    );
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(unix)]
struct ReloadSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl ReloadSignal {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        let hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        Ok(Self(hangup))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct ReloadSignal;

#[cfg(not(unix))]
impl ReloadSignal {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
