//! Records handed from the pipeline to sinks, plus queue envelope types.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::{CanSignal, CanSubFrame, DeviceId, EventData, GpsFix};

/// Named stream a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    RawFrames,
    Telemetry,
    CanRaw,
    CanSignals,
    Events,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::RawFrames,
        RecordKind::Telemetry,
        RecordKind::CanRaw,
        RecordKind::CanSignals,
        RecordKind::Events,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawFrames => "raw_frames",
            Self::Telemetry => "telemetry",
            Self::CanRaw => "can_raw",
            Self::CanSignals => "can_signals",
            Self::Events => "events",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission priority at the backpressure gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Unit of output produced by the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    RawFrame(RawFrameRecord),
    Telemetry(TelemetryRecord),
    CanRaw(CanRawRecord),
    CanSignal(CanSignal),
    Event(EventRecord),
}

impl Record {
    /// Stream this record is routed to
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::RawFrame(_) => RecordKind::RawFrames,
            Self::Telemetry(_) => RecordKind::Telemetry,
            Self::CanRaw(_) => RecordKind::CanRaw,
            Self::CanSignal(_) => RecordKind::CanSignals,
            Self::Event(_) => RecordKind::Events,
        }
    }

    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::RawFrame(r) => r.device_id.as_ref(),
            Self::Telemetry(r) => Some(&r.device_id),
            Self::CanRaw(r) => Some(&r.device_id),
            Self::CanSignal(s) => Some(&s.device_id),
            Self::Event(r) => Some(&r.device_id),
        }
    }
}

/// A frame as received, kept for audit and replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrameRecord {
    /// Absent if the frame never passed CRC
    pub device_id: Option<DeviceId>,
    pub source: SocketAddr,
    pub received_at: DateTime<Utc>,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub device_id: DeviceId,
    pub device_time: DateTime<Utc>,
    pub fix: GpsFix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanRawRecord {
    pub device_id: DeviceId,
    pub frame: CanSubFrame,
    /// True when `frame.payload` holds a reassembled TP transfer
    pub reassembled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub device_id: DeviceId,
    pub device_time: DateTime<Utc>,
    pub event: EventData,
}

/// Envelope stored in a backpressure queue
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub stream_key: RecordKind,
    pub payload: Record,
    pub priority: Priority,
    pub enqueued_at: Instant,
}

impl QueueItem {
    pub fn new(payload: Record, priority: Priority) -> Self {
        Self {
            stream_key: payload.kind(),
            payload,
            priority,
            enqueued_at: Instant::now(),
        }
    }
}

/// Records of one stream flushed together to the sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordBatch {
    pub kind: RecordKind,
    pub batch_id: u64,
    pub records: Vec<Record>,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_strings() {
        let names: Vec<_> = RecordKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            ["raw_frames", "telemetry", "can_raw", "can_signals", "events"]
        );
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
    }

    #[test]
    fn test_record_serializes_with_type_tag() {
        let record = Record::Event(EventRecord {
            device_id: DeviceId::from_raw([0; 8]),
            device_time: DateTime::<Utc>::UNIX_EPOCH,
            event: EventData {
                code: 42,
                data: Bytes::from_static(&[1, 2]),
            },
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["code"], 42);
        assert_eq!(record.kind(), RecordKind::Events);
    }
}
