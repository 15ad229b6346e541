//! Output seam of the batch writers

use crate::{ContractError, RecordBatch};

/// Destination for flushed record batches.
///
/// Each sink runs on its own worker task behind a bounded queue, so an
/// implementation may block or retry without stalling ingestion. Batches
/// arrive one stream at a time (`batch.kind`).
#[trait_variant::make(RecordSink: Send)]
pub trait LocalRecordSink {
    fn name(&self) -> &str;

    /// # Errors
    /// `ContractError::SinkWrite` naming the sink; the worker counts the
    /// failure and moves on to the next batch.
    async fn write(&mut self, batch: &RecordBatch) -> Result<(), ContractError>;

    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Called once when the writer pool shuts down
    async fn close(&mut self) -> Result<(), ContractError>;
}
