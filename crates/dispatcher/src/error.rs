//! Dispatcher error types

use contracts::SinkType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    /// A configured sink could not be opened
    #[error("failed to create {sink_type:?} sink '{name}': {source}")]
    SinkCreation {
        name: String,
        sink_type: SinkType,
        #[source]
        source: std::io::Error,
    },

    /// Two sinks share a name, which would merge their metrics
    #[error("sink name '{name}' configured more than once")]
    DuplicateSink { name: String },
}

impl DispatcherError {
    pub fn sink_creation(name: impl Into<String>, sink_type: SinkType, source: std::io::Error) -> Self {
        Self::SinkCreation {
            name: name.into(),
            sink_type,
            source,
        }
    }
}
