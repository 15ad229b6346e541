//! # Ingestion
//!
//! Device-facing side of the gateway.
//!
//! Responsibilities:
//! - Accept tracker connections (`TcpServer`), one task each
//! - Frame, parse and ACK every message before touching it further
//! - Route GPS, events, raw and reassembled CAN, and decoded signals to the
//!   backpressure gate
//! - Count everything in `IngestionMetrics`
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{IngestContext, TcpServer};
//!
//! let ctx = IngestContext::new(config, Arc::new(decoder));
//! let server = TcpServer::bind(ctx.clone()).await?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run(shutdown_rx).await?;
//! ```

mod connection;
mod context;
mod error;
mod server;
pub mod simulator;
mod stats;
#[cfg(test)]
mod testutil;

pub use connection::{handle_connection, CloseReason};
pub use context::IngestContext;
pub use error::{IngestionError, Result};
pub use server::TcpServer;
pub use simulator::{DeviceSimulator, SimulationReport};
pub use stats::{IngestionMetrics, MetricsSnapshot};
