//! BackpressureGate - bounded per-stream queues with priority admission
//!
//! Every stream gets its own queue of `max_queue_size`. Past the soft limit
//! (`drop_threshold_ratio` of capacity) low priority records are shed and
//! high priority records make room by evicting older, less important ones.

use contracts::{BackpressureConfig, Priority, QueueItem, Record, RecordKind};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-stream counters and occupancy
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub stream: RecordKind,
    pub len: usize,
    pub capacity: usize,
    pub accepted: u64,
    pub soft_drops: u64,
    pub hard_drops: u64,
    pub evictions: u64,
}

impl QueueStats {
    /// Occupancy in `[0, 1]`
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.len as f64 / self.capacity as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Accept,
    /// Remove the item at this index, then accept
    Evict(usize),
    SoftDrop,
    HardDrop,
    /// High priority on a queue full of high priority items
    Wait,
}

#[derive(Default)]
struct StreamQueue {
    items: Mutex<VecDeque<QueueItem>>,
    not_empty: Notify,
    not_full: Notify,
    accepted: AtomicU64,
    soft_drops: AtomicU64,
    hard_drops: AtomicU64,
    evictions: AtomicU64,
}

impl StreamQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission control in front of the batch writers
pub struct BackpressureGate {
    capacity: usize,
    ratio: f64,
    high_priority_wait: Duration,
    streams: Mutex<HashMap<RecordKind, Arc<StreamQueue>>>,
    /// Sum of all queue lengths, written under the owning queue's lock
    total_len: AtomicUsize,
    forced_persist_only: AtomicBool,
}

impl BackpressureGate {
    pub fn new(config: &BackpressureConfig) -> Self {
        Self {
            capacity: config.max_queue_size.max(1),
            ratio: config.drop_threshold_ratio,
            high_priority_wait: config.high_priority_wait(),
            streams: Mutex::new(HashMap::new()),
            total_len: AtomicUsize::new(0),
            forced_persist_only: AtomicBool::new(config.persist_only),
        }
    }

    /// Queue capacity per stream
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy at which low priority puts start being shed
    pub fn soft_limit(&self) -> f64 {
        self.ratio * self.capacity as f64
    }

    /// Offer a record to `stream`; false when it was dropped
    pub async fn put(&self, stream: RecordKind, payload: Record, priority: Priority) -> bool {
        let queue = self.queue(stream);
        let item = QueueItem {
            stream_key: stream,
            payload,
            priority,
            enqueued_at: std::time::Instant::now(),
        };
        let deadline = Instant::now() + self.high_priority_wait;

        loop {
            let notified = queue.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut items = queue.lock();
                match self.admission(&items, priority) {
                    Admission::Accept => {
                        items.push_back(item);
                        self.total_len.fetch_add(1, Ordering::Relaxed);
                        drop(items);
                        queue.accepted.fetch_add(1, Ordering::Relaxed);
                        queue.not_empty.notify_one();
                        return true;
                    }
                    Admission::Evict(index) => {
                        if let Some(evicted) = items.remove(index) {
                            debug!(
                                stream = %stream,
                                evicted_priority = ?evicted.priority,
                                "Evicted queued record for high priority put"
                            );
                        }
                        items.push_back(item);
                        drop(items);
                        queue.evictions.fetch_add(1, Ordering::Relaxed);
                        queue.accepted.fetch_add(1, Ordering::Relaxed);
                        ::metrics::counter!("gate_evictions_total", "stream" => stream.as_str())
                            .increment(1);
                        queue.not_empty.notify_one();
                        return true;
                    }
                    Admission::SoftDrop => {
                        drop(items);
                        queue.soft_drops.fetch_add(1, Ordering::Relaxed);
                        ::metrics::counter!(
                            "gate_drops_total",
                            "stream" => stream.as_str(),
                            "reason" => "soft"
                        )
                        .increment(1);
                        return false;
                    }
                    Admission::HardDrop => {
                        drop(items);
                        self.hard_drop(&queue, stream);
                        return false;
                    }
                    Admission::Wait => {}
                }
            }

            if Instant::now() >= deadline {
                self.hard_drop(&queue, stream);
                return false;
            }
            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    /// Oldest item of `stream`, waiting at most `timeout`
    pub async fn get(&self, stream: RecordKind, timeout: Duration) -> Option<QueueItem> {
        let queue = self.queue(stream);
        let deadline = Instant::now() + timeout;

        loop {
            let notified = queue.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = {
                let mut items = queue.lock();
                let item = items.pop_front();
                if item.is_some() {
                    self.total_len.fetch_sub(1, Ordering::Relaxed);
                }
                item
            };
            if let Some(item) = popped {
                queue.not_full.notify_one();
                return Some(item);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Current length of `stream`
    pub fn len(&self, stream: RecordKind) -> usize {
        self.existing(stream).map_or(0, |q| q.lock().len())
    }

    /// True when every stream is empty
    pub fn is_empty(&self) -> bool {
        self.total_len.load(Ordering::Relaxed) == 0
    }

    /// Aggregate occupancy across streams is at or past the threshold
    pub fn is_overloaded(&self) -> bool {
        let stream_count = self.lock_streams().len();
        if stream_count == 0 {
            return false;
        }
        let total_capacity = (stream_count * self.capacity) as f64;
        let total_len = self.total_len.load(Ordering::Relaxed) as f64;
        total_len / total_capacity >= self.ratio
    }

    /// Whether the pipeline should skip decoding and store raw data only
    pub fn should_persist_only(&self) -> bool {
        self.forced_persist_only.load(Ordering::Relaxed) || self.is_overloaded()
    }

    pub fn force_persist_only(&self, enabled: bool) {
        let previous = self.forced_persist_only.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            info!(enabled, "Persist-only mode toggled");
        }
    }

    pub fn stats(&self, stream: RecordKind) -> Option<QueueStats> {
        self.existing(stream).map(|q| self.stats_of(stream, &q))
    }

    /// Stats of every stream seen so far, in stream order
    pub fn snapshot(&self) -> Vec<QueueStats> {
        let mut streams: Vec<_> = self
            .lock_streams()
            .iter()
            .map(|(kind, q)| (*kind, Arc::clone(q)))
            .collect();
        streams.sort_by_key(|(kind, _)| *kind);
        streams
            .into_iter()
            .map(|(kind, q)| self.stats_of(kind, &q))
            .collect()
    }

    fn admission(&self, items: &VecDeque<QueueItem>, priority: Priority) -> Admission {
        let len = items.len();
        let full = len >= self.capacity;
        let at_soft_limit = len as f64 >= self.soft_limit();

        match priority {
            Priority::Low if at_soft_limit => Admission::SoftDrop,
            Priority::Low | Priority::Normal if full => Admission::HardDrop,
            Priority::Low | Priority::Normal => Admission::Accept,
            Priority::High if at_soft_limit => {
                let victim = items
                    .iter()
                    .position(|i| i.priority == Priority::Low)
                    .or_else(|| items.iter().position(|i| i.priority == Priority::Normal));
                match victim {
                    Some(index) => Admission::Evict(index),
                    None if full => Admission::Wait,
                    None => Admission::Accept,
                }
            }
            Priority::High => Admission::Accept,
        }
    }

    fn hard_drop(&self, queue: &StreamQueue, stream: RecordKind) {
        let drops = queue.hard_drops.fetch_add(1, Ordering::Relaxed) + 1;
        ::metrics::counter!("gate_drops_total", "stream" => stream.as_str(), "reason" => "hard")
            .increment(1);
        if drops.is_power_of_two() {
            warn!(stream = %stream, hard_drops = drops, "Queue full, record dropped");
        }
    }

    fn stats_of(&self, stream: RecordKind, queue: &StreamQueue) -> QueueStats {
        QueueStats {
            stream,
            len: queue.lock().len(),
            capacity: self.capacity,
            accepted: queue.accepted.load(Ordering::Relaxed),
            soft_drops: queue.soft_drops.load(Ordering::Relaxed),
            hard_drops: queue.hard_drops.load(Ordering::Relaxed),
            evictions: queue.evictions.load(Ordering::Relaxed),
        }
    }

    fn queue(&self, stream: RecordKind) -> Arc<StreamQueue> {
        Arc::clone(self.lock_streams().entry(stream).or_default())
    }

    fn existing(&self, stream: RecordKind) -> Option<Arc<StreamQueue>> {
        self.lock_streams().get(&stream).cloned()
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<RecordKind, Arc<StreamQueue>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
