//! Decoder error types

use contracts::ContractError;
use thiserror::Error;

/// Failures while compiling or swapping dictionaries.
///
/// Decoding itself never fails; unmatched traffic yields no signals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecoderError {
    /// OBD-II formula rejected by the parser
    #[error("formula '{formula}' at column {position}: {message}")]
    Formula {
        formula: String,
        position: usize,
        message: String,
    },

    /// Dictionary could not be read, parsed or compiled
    #[error("dictionary '{name}': {message}")]
    DictionaryLoad { name: String, message: String },
}

impl DecoderError {
    pub fn formula(formula: &str, position: usize, message: impl Into<String>) -> Self {
        Self::Formula {
            formula: formula.to_string(),
            position,
            message: message.into(),
        }
    }

    pub fn dictionary_load(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DictionaryLoad {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<ContractError> for DecoderError {
    fn from(err: ContractError) -> Self {
        match err {
            ContractError::DictionaryLoad {
                source_name,
                message,
            } => Self::DictionaryLoad {
                name: source_name,
                message,
            },
            other => Self::DictionaryLoad {
                name: String::new(),
                message: other.to_string(),
            },
        }
    }
}

/// Crate result alias
pub type Result<T> = std::result::Result<T, DecoderError>;
