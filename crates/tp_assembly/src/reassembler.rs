//! Shared TP session table

use bytes::Bytes;
use contracts::{DeviceId, TpConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

use crate::frame::{TpControl, TpFrame};
use crate::session::{SessionKey, TpKind, TpSession, TpState};

struct Table {
    sessions: HashMap<SessionKey, TpSession>,
    last_sweep: Instant,
}

/// TP reassembler shared by all connection tasks
pub struct TpReassembler {
    table: Mutex<Table>,
    timeout: Duration,
    sweep_interval: Duration,
    max_sessions: usize,
    stats: TpCounters,
}

#[derive(Debug, Default)]
struct TpCounters {
    started: AtomicU64,
    completed: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
    overwritten: AtomicU64,
    ignored: AtomicU64,
}

/// Snapshot of reassembler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TpStats {
    pub started: u64,
    pub completed: u64,
    /// Sessions removed by timeout, on sweep or on late arrival
    pub expired: u64,
    /// Sessions removed by the `max_sessions` cap
    pub evicted: u64,
    /// Sessions replaced by a new BAM/RTS with the same key
    pub overwritten: u64,
    /// TP frames with no live session to attach to
    pub ignored: u64,
    pub active: usize,
}

impl TpReassembler {
    pub fn new(config: &TpConfig) -> Self {
        Self {
            table: Mutex::new(Table {
                sessions: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            timeout: config.timeout(),
            sweep_interval: config.sweep_interval(),
            max_sessions: config.max_sessions.max(1),
            stats: TpCounters::default(),
        }
    }

    /// Feed one CAN frame.
    ///
    /// Returns the assembled transfer exactly once, on the completing frame.
    /// `None` for intermediate frames and non-TP traffic.
    pub fn process_frame(&self, device_id: &DeviceId, can_id: u32, payload: &[u8]) -> Option<Bytes> {
        self.process_frame_at(Instant::now(), device_id, can_id, payload)
    }

    /// `process_frame` with an explicit clock
    pub fn process_frame_at(
        &self,
        now: Instant,
        device_id: &DeviceId,
        can_id: u32,
        payload: &[u8],
    ) -> Option<Bytes> {
        let frame = TpFrame::parse(can_id, payload)?;
        let key = SessionKey {
            device_id: device_id.clone(),
            pgn: frame.pgn,
            source_address: frame.source_address,
            session_id: frame.session_id,
        };

        let mut table = self.lock();
        self.maybe_sweep(&mut table, now);

        // a late frame never revives a timed-out session
        if table
            .sessions
            .get(&key)
            .is_some_and(|s| s.is_expired(now, self.timeout))
        {
            table.sessions.remove(&key);
            self.record_expired(&key, 1);
        }

        match frame.control {
            TpControl::Bam { total_size, inline } => {
                let mut session = TpSession::new(TpKind::Bam, total_size, now);
                if !inline.is_empty() {
                    session.store(0, inline, now);
                }
                session.state = TpState::Collecting;
                self.open(&mut table, key, session, total_size)
            }
            TpControl::Rts { total_size } => {
                let session = TpSession::new(TpKind::Rts, total_size, now);
                self.open(&mut table, key, session, total_size)
            }
            TpControl::Cts => {
                match table.sessions.get_mut(&key) {
                    Some(session) => session.touch(now),
                    None => self.record_ignored(&key, "cts"),
                }
                None
            }
            TpControl::Data { sequence, data } => {
                let Some(session) = table.sessions.get_mut(&key) else {
                    self.record_ignored(&key, "data");
                    return None;
                };
                trace!(
                    device_id = %key.device_id,
                    pgn = key.pgn,
                    sequence,
                    len = data.len(),
                    "TP data fragment"
                );
                session.store(sequence, data, now);
                self.complete_if_ready(&mut table, &key)
            }
            TpControl::EndOfMessage => {
                let Some(session) = table.sessions.get_mut(&key) else {
                    self.record_ignored(&key, "eom");
                    return None;
                };
                session.touch(now);
                self.complete_if_ready(&mut table, &key)
            }
        }
    }

    /// Force a sweep of timed-out sessions; returns how many were removed
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut table = self.lock();
        self.sweep(&mut table, now)
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// State of a live session, if any
    pub fn session_state(&self, key: &SessionKey) -> Option<TpState> {
        self.lock().sessions.get(key).map(|s| s.state)
    }

    pub fn stats(&self) -> TpStats {
        TpStats {
            started: self.stats.started.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
            overwritten: self.stats.overwritten.load(Ordering::Relaxed),
            ignored: self.stats.ignored.load(Ordering::Relaxed),
            active: self.session_count(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(
        &self,
        table: &mut Table,
        key: SessionKey,
        session: TpSession,
        total_size: u16,
    ) -> Option<Bytes> {
        if table.sessions.contains_key(&key) {
            self.stats.overwritten.fetch_add(1, Ordering::Relaxed);
            debug!(
                device_id = %key.device_id,
                pgn = key.pgn,
                session_id = key.session_id,
                "TP session overwritten by new announcement"
            );
        } else if table.sessions.len() >= self.max_sessions {
            self.evict_oldest(table);
        }

        debug!(
            device_id = %key.device_id,
            pgn = key.pgn,
            source_address = key.source_address,
            session_id = key.session_id,
            kind = ?session.kind,
            total_size,
            "TP session opened"
        );
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tp_sessions_total", "outcome" => "started").increment(1);

        table.sessions.insert(key.clone(), session);
        self.complete_if_ready(table, &key)
    }

    fn complete_if_ready(&self, table: &mut Table, key: &SessionKey) -> Option<Bytes> {
        let assembled = table.sessions.get(key)?.try_assemble()?;
        table.sessions.remove(key);

        info!(
            device_id = %key.device_id,
            pgn = key.pgn,
            session_id = key.session_id,
            size = assembled.len(),
            "TP transfer complete"
        );
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tp_sessions_total", "outcome" => "completed").increment(1);
        Some(assembled)
    }

    fn evict_oldest(&self, table: &mut Table) {
        let oldest = table
            .sessions
            .iter()
            .min_by_key(|(_, s)| s.last_update)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            table.sessions.remove(&key);
            warn!(
                device_id = %key.device_id,
                pgn = key.pgn,
                session_id = key.session_id,
                max_sessions = self.max_sessions,
                "TP session evicted at capacity"
            );
            self.stats.evicted.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("tp_sessions_total", "outcome" => "evicted").increment(1);
        }
    }

    fn maybe_sweep(&self, table: &mut Table, now: Instant) {
        if now.saturating_duration_since(table.last_sweep) >= self.sweep_interval {
            self.sweep(table, now);
        }
    }

    #[instrument(name = "tp_sweep", skip(self, table), fields(sessions = table.sessions.len()))]
    fn sweep(&self, table: &mut Table, now: Instant) -> usize {
        table.last_sweep = now;
        let timeout = self.timeout;
        let before = table.sessions.len();
        table.sessions.retain(|key, session| {
            let keep = !session.is_expired(now, timeout);
            if !keep {
                debug!(
                    device_id = %key.device_id,
                    pgn = key.pgn,
                    session_id = key.session_id,
                    fragments = session.fragments.len(),
                    "TP session timed out"
                );
            }
            keep
        });
        let removed = before - table.sessions.len();
        if removed > 0 {
            self.stats.expired.fetch_add(removed as u64, Ordering::Relaxed);
            metrics::counter!("tp_sessions_total", "outcome" => "expired").increment(removed as u64);
            warn!(removed, timeout_ms = timeout.as_millis() as u64, "TP sessions expired");
        }
        removed
    }

    fn record_expired(&self, key: &SessionKey, count: u64) {
        warn!(
            device_id = %key.device_id,
            pgn = key.pgn,
            session_id = key.session_id,
            "TP session expired before next frame"
        );
        self.stats.expired.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("tp_sessions_total", "outcome" => "expired").increment(count);
    }

    fn record_ignored(&self, key: &SessionKey, reason: &'static str) {
        trace!(
            device_id = %key.device_id,
            pgn = key.pgn,
            session_id = key.session_id,
            reason,
            "TP frame without session"
        );
        self.stats.ignored.fetch_add(1, Ordering::Relaxed);
    }
}
