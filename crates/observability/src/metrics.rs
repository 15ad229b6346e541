//! Gateway metric recorders and in-process statistics
//!
//! Recorders are thin wrappers over the `metrics` macros so metric names live
//! in one place. They are no-ops until a recorder (Prometheus) is installed.

use contracts::RecordKind;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

/// Register help text and units with the installed recorder
pub fn describe_metrics() {
    describe_counter!(
        "navtel_frames_received_total",
        "Frames handed over by the stream extractor"
    );
    describe_histogram!(
        "navtel_frame_size_bytes",
        Unit::Bytes,
        "Size of extracted frames including markers"
    );
    describe_counter!("navtel_replies_sent_total", "ACK and NACK replies written");
    describe_counter!("navtel_decode_errors_total", "Frames rejected by the codec");
    describe_histogram!(
        "navtel_ack_latency_ms",
        Unit::Milliseconds,
        "Extraction to flushed ACK"
    );
    describe_counter!("navtel_tp_events_total", "J1939 TP session lifecycle events");
    describe_counter!(
        "navtel_signals_decoded_total",
        Unit::Count,
        "CAN signals produced by the decoder"
    );
    describe_counter!(
        "navtel_rate_limited_total",
        "CAN frames refused by the per-device rate limit"
    );
    describe_gauge!("navtel_queue_depth", Unit::Count, "Pending items per gate stream");
    describe_counter!("navtel_queue_drops_total", "Records refused by the gate");
    describe_counter!("navtel_connection_events_total", "Device connection opens and closes");
    describe_gauge!("navtel_connections_active", Unit::Count, "Open device connections");
}

/// Frame handed over by the extractor
pub fn record_frame_received(frame_len: usize) {
    counter!("navtel_frames_received_total").increment(1);
    histogram!("navtel_frame_size_bytes").record(frame_len as f64);
}

/// ACK (`positive`) or NACK written to a device
pub fn record_ack_sent(positive: bool) {
    let kind = if positive { "ack" } else { "nack" };
    counter!("navtel_replies_sent_total", "kind" => kind).increment(1);
}

/// Frame rejected by the codec, labelled with the error kind
pub fn record_decode_error(kind: &'static str) {
    counter!("navtel_decode_errors_total", "kind" => kind).increment(1);
}

/// Time from frame extraction to the flushed ACK
pub fn record_ack_latency_ms(latency_ms: f64) {
    histogram!("navtel_ack_latency_ms").record(latency_ms);
}

/// TP session lifecycle event (`completed`, `expired`, ...)
pub fn record_tp_event(event: &'static str) {
    counter!("navtel_tp_events_total", "event" => event).increment(1);
}

pub fn record_signals_decoded(count: usize) {
    counter!("navtel_signals_decoded_total").increment(count as u64);
}

/// CAN frame refused by the per-device rate limit
pub fn record_rate_limited() {
    counter!("navtel_rate_limited_total").increment(1);
}

/// Current depth of one gate stream
pub fn record_queue_depth(stream: RecordKind, depth: usize) {
    gauge!("navtel_queue_depth", "stream" => stream.as_str()).set(depth as f64);
}

/// Record refused by the gate
pub fn record_queue_drop(stream: RecordKind) {
    counter!("navtel_queue_drops_total", "stream" => stream.as_str()).increment(1);
}

/// Connection opened or closed; `event` is `opened` or the close reason
pub fn record_connection_event(event: &'static str, active: usize) {
    counter!("navtel_connection_events_total", "event" => event).increment(1);
    gauge!("navtel_connections_active").set(active as f64);
}

/// Summary of a [`RunningStats`]
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
