//! FileSink - appends records as JSON lines, one file per stream

use contracts::{ContractError, RecordBatch, RecordKind, RecordSink};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output directory; each stream writes `<base_path>/<stream>.jsonl`
    pub base_path: PathBuf,
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));

        Self { base_path }
    }
}

/// Sink that appends every record to a per-stream JSON lines file
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    writers: HashMap<RecordKind, BufWriter<File>>,
}

impl FileSink {
    /// Create a new FileSink, creating the output directory
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;

        Ok(Self {
            name: name.into(),
            config,
            writers: HashMap::new(),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileSinkConfig::from_params(params))
    }

    /// File a stream is appended to
    pub fn stream_path(base_path: &Path, kind: RecordKind) -> PathBuf {
        base_path.join(format!("{}.jsonl", kind.as_str()))
    }

    fn append_batch(&mut self, batch: &RecordBatch) -> std::io::Result<()> {
        let writer = match self.writers.entry(batch.kind) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let path = Self::stream_path(&self.config.base_path, batch.kind);
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                debug!(sink = %self.name, path = %path.display(), "Opened stream file");
                e.insert(BufWriter::new(file))
            }
        };

        for record in &batch.records {
            serde_json::to_writer(&mut *writer, record)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn persist_batch(&mut self, batch: &RecordBatch) -> Result<(), ContractError> {
        self.append_batch(batch).map_err(|e| {
            error!(sink = %self.name, batch_id = batch.batch_id, error = %e, "Write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })
    }

    fn flush_all(&mut self) -> Result<(), ContractError> {
        for writer in self.writers.values_mut() {
            writer
                .flush()
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        }
        Ok(())
    }
}

impl RecordSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, batch),
        fields(sink = %self.name, stream = %batch.kind, batch_id = batch.batch_id)
    )]
    async fn write(&mut self, batch: &RecordBatch) -> Result<(), ContractError> {
        self.persist_batch(batch)?;
        Ok(())
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        self.flush_all()
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.flush_all()?;
        self.writers.clear();
        debug!(sink = %self.name, "FileSink closed");
        Ok(())
    }
}
