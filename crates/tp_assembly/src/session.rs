//! TP session state

use bytes::{Bytes, BytesMut};
use contracts::DeviceId;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::frame::TP_DATA_BYTES;

/// Session table key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub device_id: DeviceId,
    pub pgn: u32,
    pub source_address: u8,
    pub session_id: u8,
}

/// How the transfer was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpKind {
    Bam,
    Rts,
}

/// Live session states.
///
/// Complete and Expired are terminal: the session leaves the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpState {
    AwaitingFirst,
    Collecting,
}

#[derive(Debug)]
pub(crate) struct TpSession {
    pub total_size: usize,
    pub fragments: BTreeMap<u8, Bytes>,
    pub kind: TpKind,
    pub state: TpState,
    pub last_update: Instant,
}

impl TpSession {
    pub fn new(kind: TpKind, total_size: u16, now: Instant) -> Self {
        Self {
            total_size: usize::from(total_size),
            fragments: BTreeMap::new(),
            kind,
            state: TpState::AwaitingFirst,
            last_update: now,
        }
    }

    pub fn store(&mut self, sequence: u8, data: Bytes, now: Instant) {
        self.fragments.insert(sequence, data);
        self.state = TpState::Collecting;
        self.last_update = now;
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_update = now;
    }

    pub fn is_expired(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_update) > timeout
    }

    /// Assembled bytes once both the fragment count and the contiguous
    /// coverage reach `total_size`.
    ///
    /// The run starts at sequence 0 when present, else 1, and stops at the
    /// first gap.
    pub fn try_assemble(&self) -> Option<Bytes> {
        let needed_frames = self.total_size.div_ceil(TP_DATA_BYTES);
        if self.fragments.len() < needed_frames {
            return None;
        }

        let first = if self.fragments.contains_key(&0) { 0u8 } else { 1u8 };
        let mut out = BytesMut::with_capacity(self.total_size);
        let mut expected = first;
        for (&seq, data) in self.fragments.range(first..) {
            if seq != expected {
                break;
            }
            out.extend_from_slice(data);
            if out.len() >= self.total_size {
                break;
            }
            expected = expected.wrapping_add(1);
        }

        if out.len() < self.total_size {
            return None;
        }
        out.truncate(self.total_size);
        Some(out.freeze())
    }
}
