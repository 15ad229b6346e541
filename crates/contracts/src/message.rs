//! ParsedMessage - ProtocolCodec output
//!
//! Navtelecom v6 frame content after CRC validation.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::DeviceId;

/// One delimited frame cut out of a TCP stream, markers included.
///
/// Consumed immediately by the pipeline, never retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    /// Frame bytes, `0x7E ... 0x7E`
    pub bytes: Bytes,

    /// Peer that sent the frame
    pub source: SocketAddr,

    /// Wall-clock time of extraction
    pub received_at: DateTime<Utc>,
}

/// Payload type tag carried in DATA byte 12
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Gps,
    Can,
    Event,
    RawCan,
    Extended,
    Unknown(u8),
}

impl DataType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Gps,
            0x02 => Self::Can,
            0x03 => Self::Event,
            0x04 => Self::RawCan,
            0x05 => Self::Extended,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Gps => 0x01,
            Self::Can => 0x02,
            Self::Event => 0x03,
            Self::RawCan => 0x04,
            Self::Extended => 0x05,
            Self::Unknown(code) => code,
        }
    }
}

/// A validated protocol message.
///
/// Never constructed from a frame whose CRC failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub device_id: DeviceId,

    /// Device clock, seconds since epoch on the wire
    pub device_time: DateTime<Utc>,

    pub data_type: DataType,

    pub payload: MessagePayload,
}

impl ParsedMessage {
    /// CAN sub-frames carried by this message, empty for non-CAN types.
    pub fn can_frames(&self) -> &[CanSubFrame] {
        match &self.payload {
            MessagePayload::Can(frames) => frames,
            _ => &[],
        }
    }
}

/// Typed payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MessagePayload {
    Gps(GpsFix),
    Can(Vec<CanSubFrame>),
    Event(EventData),
    Extended(ExtendedData),
    /// Unknown data type, kept verbatim
    Opaque(Bytes),
}

/// GPS fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Degrees
    pub latitude: f64,

    /// Degrees
    pub longitude: f64,

    /// km/h
    pub speed: f64,

    /// Degrees
    pub course: f64,

    /// Metres
    pub altitude: u16,

    pub satellites: u8,

    pub ignition: bool,
}

/// Device event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub code: u16,
    pub data: Bytes,
}

/// Extended block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedData {
    pub ext_type: u16,
    pub data: Bytes,
}

/// CAN frame embedded in a protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanSubFrame {
    /// Identifier as sent, 11 or 29 bit
    pub can_id: u32,

    /// Data length code (up to 64 for CAN FD)
    pub dlc: u8,

    pub is_extended: bool,

    pub payload: Bytes,

    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_codes() {
        for code in 0u8..=0x10 {
            assert_eq!(DataType::from_code(code).code(), code);
        }
        assert_eq!(DataType::from_code(0x02), DataType::Can);
        assert_eq!(DataType::from_code(0x42), DataType::Unknown(0x42));
    }

    #[test]
    fn test_can_frames_accessor() {
        let msg = ParsedMessage {
            device_id: DeviceId::from_raw([0; 8]),
            device_time: DateTime::<Utc>::UNIX_EPOCH,
            data_type: DataType::Event,
            payload: MessagePayload::Event(EventData {
                code: 1,
                data: Bytes::new(),
            }),
        };
        assert!(msg.can_frames().is_empty());
    }
}
