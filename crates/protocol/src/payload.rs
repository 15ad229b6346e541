//! Typed payload layouts carried after the 13-byte DATA header

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use contracts::{
    CanSubFrame, DataType, EventData, ExtendedData, GpsFix, MessagePayload,
};

use crate::error::{ProtocolError, Result};

/// Minimum GPS payload
pub const GPS_PAYLOAD_LEN: usize = 16;
/// `[timestamp u32][can_id u32][dlc u8][is_extended u8]`
pub const RAW_CAN_HEADER_LEN: usize = 10;
/// Largest data length code accepted (CAN FD)
pub const MAX_CAN_DLC: usize = 64;
/// Highest 11-bit identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

pub(crate) fn parse(
    data_type: DataType,
    body: &[u8],
    device_time: DateTime<Utc>,
) -> Result<MessagePayload> {
    match data_type {
        DataType::Gps => parse_gps(body).map(MessagePayload::Gps),
        DataType::Can => parse_legacy_can(body, device_time).map(|f| MessagePayload::Can(vec![f])),
        DataType::Event => parse_event(body).map(MessagePayload::Event),
        DataType::RawCan => parse_raw_can_block(body).map(MessagePayload::Can),
        DataType::Extended => parse_extended(body).map(MessagePayload::Extended),
        DataType::Unknown(_) => Ok(MessagePayload::Opaque(Bytes::copy_from_slice(body))),
    }
}

fn parse_gps(body: &[u8]) -> Result<GpsFix> {
    if body.len() < GPS_PAYLOAD_LEN {
        return Err(ProtocolError::malformed_payload(
            DataType::Gps,
            format!("need {GPS_PAYLOAD_LEN} bytes, got {}", body.len()),
        ));
    }
    Ok(GpsFix {
        latitude: read_i32(body, 0) as f64 / 1e7,
        longitude: read_i32(body, 4) as f64 / 1e7,
        speed: read_u16(body, 8) as f64 / 10.0,
        course: read_u16(body, 10) as f64 / 10.0,
        altitude: read_u16(body, 12),
        satellites: body[14],
        ignition: body[15] & 0x01 != 0,
    })
}

fn parse_legacy_can(body: &[u8], device_time: DateTime<Utc>) -> Result<CanSubFrame> {
    if body.len() < 4 {
        return Err(ProtocolError::malformed_payload(
            DataType::Can,
            format!("need 4 bytes for can id, got {}", body.len()),
        ));
    }
    let data = &body[4..];
    if data.len() > MAX_CAN_DLC {
        return Err(ProtocolError::malformed_payload(
            DataType::Can,
            format!("payload of {} bytes exceeds {MAX_CAN_DLC}", data.len()),
        ));
    }
    let can_id = read_u32(body, 0);
    Ok(CanSubFrame {
        can_id,
        dlc: data.len() as u8,
        is_extended: can_id > MAX_STANDARD_ID,
        payload: Bytes::copy_from_slice(data),
        timestamp: device_time,
    })
}

fn parse_event(body: &[u8]) -> Result<EventData> {
    if body.len() < 2 {
        return Err(ProtocolError::malformed_payload(
            DataType::Event,
            "missing event code",
        ));
    }
    Ok(EventData {
        code: read_u16(body, 0),
        data: Bytes::copy_from_slice(&body[2..]),
    })
}

/// Repeated records until the block is exhausted.
///
/// A truncated trailing record ends the block without error.
fn parse_raw_can_block(body: &[u8]) -> Result<Vec<CanSubFrame>> {
    if body.len() < RAW_CAN_HEADER_LEN {
        return Err(ProtocolError::malformed_payload(
            DataType::RawCan,
            format!("block of {} bytes is shorter than one record", body.len()),
        ));
    }

    let mut frames = Vec::new();
    let mut offset = 0;
    while offset + RAW_CAN_HEADER_LEN <= body.len() {
        let dlc = body[offset + 8] as usize;
        if dlc > MAX_CAN_DLC {
            return Err(ProtocolError::malformed_payload(
                DataType::RawCan,
                format!("record at offset {offset} has dlc {dlc}"),
            ));
        }
        let start = offset + RAW_CAN_HEADER_LEN;
        let Some(payload) = body.get(start..start + dlc) else {
            break;
        };
        frames.push(CanSubFrame {
            can_id: read_u32(body, offset + 4),
            dlc: dlc as u8,
            is_extended: body[offset + 9] != 0,
            payload: Bytes::copy_from_slice(payload),
            timestamp: timestamp_from_secs(read_u32(body, offset)),
        });
        offset = start + dlc;
    }
    Ok(frames)
}

fn parse_extended(body: &[u8]) -> Result<ExtendedData> {
    if body.len() < 4 {
        return Err(ProtocolError::malformed_payload(
            DataType::Extended,
            "missing type/length header",
        ));
    }
    let len = read_u16(body, 2) as usize;
    let data = body.get(4..4 + len).ok_or_else(|| {
        ProtocolError::malformed_payload(
            DataType::Extended,
            format!("declared {len} bytes, {} present", body.len() - 4),
        )
    })?;
    Ok(ExtendedData {
        ext_type: read_u16(body, 0),
        data: Bytes::copy_from_slice(data),
    })
}

pub(crate) fn timestamp_from_secs(secs: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(i64::from(secs), 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

// ===== Encoders (simulators, CLI, tests) =====

/// Encode a GPS fix
pub fn encode_gps(fix: &GpsFix) -> Bytes {
    let mut buf = BytesMut::with_capacity(GPS_PAYLOAD_LEN);
    buf.put_i32_le((fix.latitude * 1e7).round() as i32);
    buf.put_i32_le((fix.longitude * 1e7).round() as i32);
    buf.put_u16_le((fix.speed * 10.0).round() as u16);
    buf.put_u16_le((fix.course * 10.0).round() as u16);
    buf.put_u16_le(fix.altitude);
    buf.put_u8(fix.satellites);
    buf.put_u8(u8::from(fix.ignition));
    buf.freeze()
}

/// Encode a legacy single CAN frame (type 0x02)
pub fn encode_legacy_can(can_id: u32, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.put_u32_le(can_id);
    buf.put_slice(data);
    buf.freeze()
}

/// Encode a raw CAN block (type 0x04)
pub fn encode_raw_can_block(frames: &[CanSubFrame]) -> Bytes {
    let mut buf = BytesMut::new();
    for frame in frames {
        buf.put_u32_le(frame.timestamp.timestamp().clamp(0, i64::from(u32::MAX)) as u32);
        buf.put_u32_le(frame.can_id);
        buf.put_u8(frame.payload.len() as u8);
        buf.put_u8(u8::from(frame.is_extended));
        buf.put_slice(&frame.payload);
    }
    buf.freeze()
}

/// Encode an event (type 0x03)
pub fn encode_event(event: &EventData) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + event.data.len());
    buf.put_u16_le(event.code);
    buf.put_slice(&event.data);
    buf.freeze()
}

/// Encode an extended block (type 0x05)
pub fn encode_extended(ext: &ExtendedData) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + ext.data.len());
    buf.put_u16_le(ext.ext_type);
    buf.put_u16_le(ext.data.len() as u16);
    buf.put_slice(&ext.data);
    buf.freeze()
}
