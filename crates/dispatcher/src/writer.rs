//! BatchWriterPool - drains gate queues into batches and fans them out

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use contracts::{BatchConfig, Record, RecordBatch, RecordKind, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::gate::BackpressureGate;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{FileSink, LogSink};

/// Create sink workers from configuration
#[instrument(name = "create_sink_handles", skip(configs), fields(sink_count = configs.len()))]
pub fn create_sink_handles(configs: &[SinkConfig]) -> Result<Vec<SinkHandle>, DispatcherError> {
    let mut seen = HashSet::new();
    if let Some(dup) = configs.iter().find(|c| !seen.insert(c.name.as_str())) {
        return Err(DispatcherError::DuplicateSink {
            name: dup.name.clone(),
        });
    }
    configs.iter().map(create_sink_handle).collect()
}

fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    debug!(sink = %config.name, sink_type = ?config.sink_type, "Creating sink");
    match config.sink_type {
        SinkType::Log => {
            let sink = LogSink::new(&config.name);
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, config.sink_type, e))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

/// Final counters returned by [`BatchWriterPool::shutdown`]
#[derive(Debug, Clone, Default)]
pub struct WriterSummary {
    pub batches_flushed: u64,
    pub sinks: Vec<(String, MetricsSnapshot)>,
}

/// Consumer tasks pulling from the gate, one group per stream
pub struct BatchWriterPool {
    workers: Vec<JoinHandle<()>>,
    sinks: Arc<Vec<SinkHandle>>,
    shutdown_tx: watch::Sender<bool>,
    batches: Arc<AtomicU64>,
}

impl BatchWriterPool {
    /// Start `workers_per_stream` writers for each stream
    pub fn spawn(
        gate: Arc<BackpressureGate>,
        streams: &[RecordKind],
        sinks: Vec<SinkHandle>,
        config: &BatchConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sinks = Arc::new(sinks);
        let batches = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(streams.len() * config.workers_per_stream);
        for &stream in streams {
            for worker_id in 0..config.workers_per_stream {
                let worker = BatchWorker {
                    stream,
                    worker_id,
                    gate: Arc::clone(&gate),
                    sinks: Arc::clone(&sinks),
                    batches: Arc::clone(&batches),
                    config: config.clone(),
                };
                let shutdown = shutdown_rx.clone();
                workers.push(tokio::spawn(worker.run(shutdown)));
            }
        }

        info!(
            streams = streams.len(),
            workers = workers.len(),
            sinks = sinks.len(),
            "Batch writers started"
        );

        Self {
            workers,
            sinks,
            shutdown_tx,
            batches,
        }
    }

    /// Batches flushed so far
    pub fn batches_flushed(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Stop the writers after they drain their queues, then close the sinks
    #[instrument(name = "batch_writer_pool_shutdown", skip(self))]
    pub async fn shutdown(self) -> WriterSummary {
        let _ = self.shutdown_tx.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = ?e, "Batch writer panicked");
            }
        }

        let metrics: Vec<_> = self
            .sinks
            .iter()
            .map(|h| (h.name().to_string(), Arc::clone(h.metrics())))
            .collect();

        match Arc::try_unwrap(self.sinks) {
            Ok(sinks) => {
                for sink in sinks {
                    sink.shutdown().await;
                }
            }
            Err(_) => error!("Sink handles still shared, skipping sink shutdown"),
        }
        let batches_flushed = self.batches.load(Ordering::Relaxed);
        info!(batches = batches_flushed, "Batch writers stopped");

        WriterSummary {
            batches_flushed,
            sinks: metrics
                .into_iter()
                .map(|(name, m)| (name, m.snapshot()))
                .collect(),
        }
    }
}

struct BatchWorker {
    stream: RecordKind,
    worker_id: usize,
    gate: Arc<BackpressureGate>,
    sinks: Arc<Vec<SinkHandle>>,
    batches: Arc<AtomicU64>,
    config: BatchConfig,
}

impl BatchWorker {
    #[instrument(
        name = "batch_writer_loop",
        skip(self, shutdown),
        fields(stream = %self.stream, worker = self.worker_id)
    )]
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let flush_interval = self.config.flush_interval();
        let mut pending: Vec<Record> = Vec::with_capacity(self.config.batch_size);
        let mut last_flush = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                item = self.gate.get(self.stream, flush_interval) => {
                    if let Some(item) = item {
                        pending.push(item.payload);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let due = last_flush.elapsed() >= flush_interval;
            if pending.len() >= self.config.batch_size || (due && !pending.is_empty()) {
                self.flush(&mut pending);
                last_flush = Instant::now();
            } else if due {
                last_flush = Instant::now();
            }
        }

        // drain what is still queued
        while let Some(item) = self.gate.get(self.stream, std::time::Duration::ZERO).await {
            pending.push(item.payload);
            if pending.len() >= self.config.batch_size {
                self.flush(&mut pending);
            }
        }
        self.flush(&mut pending);
        debug!(stream = %self.stream, worker = self.worker_id, "Batch writer stopped");
    }

    fn flush(&self, pending: &mut Vec<Record>) {
        if pending.is_empty() {
            return;
        }
        let batch = Arc::new(RecordBatch {
            kind: self.stream,
            batch_id: self.batches.fetch_add(1, Ordering::Relaxed) + 1,
            records: std::mem::replace(pending, Vec::with_capacity(self.config.batch_size)),
        });
        ::metrics::counter!("batches_flushed_total", "stream" => self.stream.as_str()).increment(1);
        ::metrics::counter!("records_flushed_total", "stream" => self.stream.as_str())
            .increment(batch.len() as u64);
        debug!(
            stream = %self.stream,
            batch_id = batch.batch_id,
            records = batch.len(),
            "Flushing batch"
        );
        for sink in self.sinks.iter() {
            sink.try_send(Arc::clone(&batch));
        }
    }
}
