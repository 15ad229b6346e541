//! LogSink - logs batch summaries via tracing

use contracts::{ContractError, RecordBatch, RecordSink};
use std::collections::HashSet;
use tracing::{info, instrument};

/// Sink that logs batch summaries for debugging
pub struct LogSink {
    name: String,
    batches: u64,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batches: 0,
        }
    }

    fn log_batch_summary(&self, batch: &RecordBatch) {
        let devices: HashSet<_> = batch
            .records
            .iter()
            .filter_map(|r| r.device_id())
            .collect();

        info!(
            sink = %self.name,
            stream = %batch.kind,
            batch_id = batch.batch_id,
            records = batch.len(),
            devices = devices.len(),
            "RecordBatch received"
        );
    }
}

impl RecordSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, batch),
        fields(sink = %self.name, batch_id = batch.batch_id)
    )]
    async fn write(&mut self, batch: &RecordBatch) -> Result<(), ContractError> {
        self.log_batch_summary(batch);
        self.batches += 1;
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        // Nothing to flush for log sink
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, batches = self.batches, "LogSink closed");
        Ok(())
    }
}
