//! Ingestion error types

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestionError {
    /// Listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer went away before a reply could be read
    #[error("connection to {peer} closed")]
    ConnectionClosed { peer: SocketAddr },
}

impl IngestionError {
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestionError>;
