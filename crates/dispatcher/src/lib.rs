//! # Dispatcher
//!
//! Everything between the ingestion pipeline and the sinks.
//!
//! Responsibilities:
//! - Admission control per stream (`BackpressureGate`)
//! - Per-device frame rate limiting
//! - Batching queued records and fanning batches out to sinks
//! - Isolating slow sinks so they never block the pipeline

pub mod error;
pub mod gate;
pub mod handle;
pub mod metrics;
pub mod rate_limit;
pub mod sinks;
pub mod writer;

#[cfg(test)]
mod testutil;

pub use contracts::{RecordBatch, RecordSink};
pub use error::DispatcherError;
pub use gate::{BackpressureGate, QueueStats};
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use rate_limit::RateLimiter;
pub use sinks::{FileSink, FileSinkConfig, LogSink};
pub use writer::{create_sink_handles, BatchWriterPool, WriterSummary};
