//! FrameExtractor - cuts marker-delimited frames out of a TCP byte stream
//!
//! A frame runs from one `0x7E` marker through the next, both included.
//! The same rule covers the ASCII and binary dialects.

use bytes::{Buf, BytesMut};
use chrono::Utc;
use contracts::{FramingConfig, RawFrame};
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// Frame boundary marker
pub const FRAME_MARKER: u8 = 0x7E;

/// Counters kept per extractor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    pub frames_emitted: u64,
    /// Bytes dropped before a start marker
    pub garbage_bytes: u64,
    pub oversized_frames: u64,
    pub buffer_overflows: u64,
}

/// Per-connection stream framer
///
/// Owned exclusively by one connection task.
#[derive(Debug)]
pub struct FrameExtractor {
    buffer: BytesMut,
    source: SocketAddr,
    max_frame_size: usize,
    max_buffer_size: usize,
    /// Dropping input through the next marker after an oversize or overflow
    discarding: bool,
    stats: ExtractorStats,
}

impl FrameExtractor {
    pub fn new(source: SocketAddr, config: &FramingConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity(config.max_frame_size.min(64 * 1024)),
            source,
            max_frame_size: config.max_frame_size,
            max_buffer_size: config.max_buffer_size,
            discarding: false,
            stats: ExtractorStats::default(),
        }
    }

    /// Append a chunk and drain every frame it makes resolvable.
    ///
    /// Never blocks. Any chunking of one stream yields the same frames.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            if self.discarding {
                match find_marker(&self.buffer, 0) {
                    Some(idx) => {
                        self.buffer.advance(idx + 1);
                        self.discarding = false;
                    }
                    None => {
                        self.buffer.clear();
                        break;
                    }
                }
            }

            match find_marker(&self.buffer, 0) {
                None => {
                    self.drop_garbage(self.buffer.len());
                    break;
                }
                Some(0) => {}
                Some(start) => self.drop_garbage(start),
            }

            let Some(end) = find_marker(&self.buffer, 1) else {
                if self.buffer.len() > self.max_frame_size {
                    self.stats.oversized_frames += 1;
                    warn!(
                        peer = %self.source,
                        buffered = self.buffer.len(),
                        max = self.max_frame_size,
                        "Partial frame exceeds max size, discarding until next marker"
                    );
                    self.buffer.clear();
                    self.discarding = true;
                }
                break;
            };

            if end == 1 {
                // `7E 7E`: the first marker closed nothing we can use
                self.drop_garbage(1);
                continue;
            }

            let frame = self.buffer.split_to(end + 1).freeze();
            if frame.len() > self.max_frame_size {
                self.stats.oversized_frames += 1;
                warn!(
                    peer = %self.source,
                    len = frame.len(),
                    max = self.max_frame_size,
                    "Oversized frame dropped"
                );
                continue;
            }

            trace!(peer = %self.source, len = frame.len(), "Frame extracted");
            self.stats.frames_emitted += 1;
            frames.push(RawFrame {
                bytes: frame,
                source: self.source,
                received_at: Utc::now(),
            });
        }

        if self.buffer.len() > self.max_buffer_size {
            self.stats.buffer_overflows += 1;
            warn!(
                peer = %self.source,
                buffered = self.buffer.len(),
                max = self.max_buffer_size,
                "Unresolved buffer overflow, clearing"
            );
            self.buffer.clear();
            self.discarding = true;
        }

        frames
    }

    /// Bytes held waiting for a closing marker
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats
    }

    fn drop_garbage(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        debug!(peer = %self.source, bytes = count, "Dropping bytes outside a frame");
        self.stats.garbage_bytes += count as u64;
        self.buffer.advance(count);
    }
}

fn find_marker(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .iter()
        .position(|&b| b == FRAME_MARKER)
        .map(|idx| idx + from)
}
