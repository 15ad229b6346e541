//! Errors shared across crate boundaries
//!
//! Protocol, decoder and transport errors live in their own crates; this enum
//! only covers what crosses the contracts seam: configuration files,
//! dictionary files and sink writes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractError {
    /// Gateway config could not be deserialised
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Config parsed but a field is out of range or inconsistent
    #[error("invalid config at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// Dictionary file unreadable, unparseable or structurally invalid.
    /// `source_name` is a path or the slot being reloaded.
    #[error("cannot load dictionary '{source_name}': {message}")]
    DictionaryLoad { source_name: String, message: String },

    /// A sink failed to persist a batch
    #[error("sink '{sink_name}' failed to write: {message}")]
    SinkWrite { sink_name: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContractError {
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn dictionary_load(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DictionaryLoad {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_culprit() {
        let err = ContractError::config_validation(
            "backpressure.drop_threshold_ratio",
            "must be in (0, 1]",
        );
        assert_eq!(
            err.to_string(),
            "invalid config at 'backpressure.drop_threshold_ratio': must be in (0, 1]"
        );

        let err = ContractError::dictionary_load("j1939", "unknown byte order");
        assert!(err.to_string().contains("'j1939'"));
    }
}
