//! Connection and frame counters

use observability::{RunningStats, StatsSummary};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Ingestion metrics
///
/// Shared by every connection task; all counters are monotonic except
/// `connections_active`.
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
    pub connections_active: AtomicUsize,

    /// Frames handed over by the extractor
    pub frames_received: AtomicU64,
    pub acks_sent: AtomicU64,
    pub nacks_sent: AtomicU64,
    pub decode_errors: AtomicU64,
    pub incomplete_frames: AtomicU64,

    pub can_frames: AtomicU64,
    pub tp_completed: AtomicU64,
    pub signals_decoded: AtomicU64,

    /// Records admitted by the gate
    pub records_enqueued: AtomicU64,
    /// Records the gate refused
    pub records_dropped: AtomicU64,
    pub rate_limited: AtomicU64,
    /// Frames stored raw while the gate was overloaded
    pub persist_only_frames: AtomicU64,

    ack_latency: Mutex<RunningStats>,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        // never wraps below zero even if a close is double-counted
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an ACK and its latency since the frame was read
    pub fn record_ack(&self, latency_ms: f64) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
        self.ack_latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(latency_ms);
    }

    pub fn record_nack(&self) {
        self.nacks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_incomplete(&self) {
        self.incomplete_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_can_frame(&self) {
        self.can_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tp_completed(&self) {
        self.tp_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signals(&self, count: usize) {
        self.signals_decoded.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Count the outcome of one gate put
    pub fn record_enqueue(&self, accepted: bool) {
        if accepted {
            self.records_enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.records_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_only(&self) {
        self.persist_only_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            nacks_sent: self.nacks_sent.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            incomplete_frames: self.incomplete_frames.load(Ordering::Relaxed),
            can_frames: self.can_frames.load(Ordering::Relaxed),
            tp_completed: self.tp_completed.load(Ordering::Relaxed),
            signals_decoded: self.signals_decoded.load(Ordering::Relaxed),
            records_enqueued: self.records_enqueued.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            persist_only_frames: self.persist_only_frames.load(Ordering::Relaxed),
            ack_latency_ms: StatsSummary::from(
                &*self.ack_latency.lock().unwrap_or_else(PoisonError::into_inner),
            ),
        }
    }
}

/// Point-in-time copy of [`IngestionMetrics`]
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub connections_active: usize,
    pub frames_received: u64,
    pub acks_sent: u64,
    pub nacks_sent: u64,
    pub decode_errors: u64,
    pub incomplete_frames: u64,
    pub can_frames: u64,
    pub tp_completed: u64,
    pub signals_decoded: u64,
    pub records_enqueued: u64,
    pub records_dropped: u64,
    pub rate_limited: u64,
    pub persist_only_frames: u64,
    pub ack_latency_ms: StatsSummary,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Ingestion Summary ===")?;
        writeln!(
            f,
            "Connections: {} opened, {} closed, {} active",
            self.connections_opened, self.connections_closed, self.connections_active
        )?;
        writeln!(
            f,
            "Frames: {} received, {} ACK, {} NACK, {} decode errors, {} incomplete",
            self.frames_received,
            self.acks_sent,
            self.nacks_sent,
            self.decode_errors,
            self.incomplete_frames
        )?;
        writeln!(
            f,
            "CAN: {} frames, {} TP transfers, {} signals, {} rate limited",
            self.can_frames, self.tp_completed, self.signals_decoded, self.rate_limited
        )?;
        writeln!(
            f,
            "Records: {} enqueued, {} dropped, {} persist-only frames",
            self.records_enqueued, self.records_dropped, self.persist_only_frames
        )?;
        write!(f, "ACK latency (ms): {}", self.ack_latency_ms)
    }
}
