//! # Protocol
//!
//! Navtelecom v6 wire handling.
//!
//! Responsibilities:
//! - Cut marker-delimited frames out of a TCP stream (`FrameExtractor`)
//! - Validate the envelope and CRC16, decode typed payloads (`try_parse`)
//! - Build ACK/NACK replies

pub mod codec;
pub mod crc;
pub mod error;
pub mod extractor;
pub mod payload;

pub use codec::{
    build_ack, build_frame, build_nack, compose_data, is_stream_safe, parse_reply, try_parse,
    AckStatus, FrameStatus, NackCode, Reply,
};
pub use error::{ProtocolError, Result};
pub use extractor::{ExtractorStats, FrameExtractor, FRAME_MARKER};
