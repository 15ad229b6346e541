//! Navtelecom v6 envelope codec
//!
//! `START(0x7E) | LENGTH(u16 LE) | DATA | CRC16(u16 LE) | END(0x7E)`
//!
//! DATA: `device_id[8] device_time[u32 LE] data_type[u8] payload[..]`

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use contracts::{DataType, DeviceId, ParsedMessage, DEVICE_ID_LEN};
use tracing::trace;

use crate::crc::{crc16, device_id_hash};
use crate::error::{ProtocolError, Result};
use crate::extractor::FRAME_MARKER;
use crate::payload;

/// START + LENGTH + CRC + END
pub const ENVELOPE_OVERHEAD: usize = 6;
/// device_id + device_time + data_type
pub const DATA_HEADER_LEN: usize = DEVICE_ID_LEN + 4 + 1;

const ACK_FLAG: u8 = 0x01;
const NACK_FLAG: u8 = 0x02;

/// Outcome of a parse attempt that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
    /// CRC-validated message
    Complete(ParsedMessage),
    /// Prefix of a frame; more bytes needed
    Incomplete,
}

/// Status byte of a positive reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ok,
}

impl AckStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0x00,
        }
    }
}

/// Error byte of a negative reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackCode {
    CrcError,
    FormatError,
}

impl NackCode {
    pub fn code(self) -> u8 {
        match self {
            Self::CrcError => 0x01,
            Self::FormatError => 0x02,
        }
    }
}

/// Parse one delimited frame.
///
/// # Errors
/// `MalformedHeader`, `ChecksumMismatch` or `MalformedPayload`; none of them
/// ever yields a message.
pub fn try_parse(frame: &[u8]) -> Result<FrameStatus> {
    match open_envelope(frame)? {
        Some(data) => parse_data(data).map(FrameStatus::Complete),
        None => Ok(FrameStatus::Incomplete),
    }
}

/// Decoded ACK/NACK reply, as a device sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    /// True for ACK, false for NACK
    pub positive: bool,
    /// ACK status or NACK error code
    pub code: u8,
    pub device_hash: u16,
}

/// Parse a reply frame written by [`build_ack`] or [`build_nack`].
///
/// # Errors
/// Envelope errors as in [`try_parse`]; an unknown flag or a DATA section
/// that is not 4 bytes is `MalformedHeader`. A prefix is also reported as
/// `MalformedHeader` since replies always arrive closed.
pub fn parse_reply(frame: &[u8]) -> Result<Reply> {
    let data = open_envelope(frame)?
        .ok_or_else(|| ProtocolError::malformed_header("truncated reply"))?;
    let [flag, code, lo, hi] = data else {
        return Err(ProtocolError::malformed_header(format!(
            "reply data of {} bytes, expected 4",
            data.len()
        )));
    };
    let positive = match *flag {
        ACK_FLAG => true,
        NACK_FLAG => false,
        other => {
            return Err(ProtocolError::malformed_header(format!(
                "unknown reply flag {other:#04x}"
            )))
        }
    };
    Ok(Reply {
        positive,
        code: *code,
        device_hash: u16::from_le_bytes([*lo, *hi]),
    })
}

/// Validate markers, length and CRC; `None` for a prefix of a frame
fn open_envelope(frame: &[u8]) -> Result<Option<&[u8]>> {
    if frame.len() < 3 {
        return Ok(None);
    }
    if frame[0] != FRAME_MARKER {
        return Err(ProtocolError::malformed_header(format!(
            "bad start marker {:#04x}",
            frame[0]
        )));
    }

    let length = u16::from_le_bytes([frame[1], frame[2]]) as usize;
    let total = length + ENVELOPE_OVERHEAD;

    if frame.len() < total {
        // a closed frame cannot grow; an unclosed one is a prefix
        if frame.last() != Some(&FRAME_MARKER) {
            return Ok(None);
        }
        return Err(ProtocolError::malformed_header(format!(
            "declared length {length} exceeds frame of {} bytes",
            frame.len()
        )));
    }
    if frame.len() > total {
        return Err(ProtocolError::malformed_header(format!(
            "{} trailing bytes after end marker position",
            frame.len() - total
        )));
    }
    if frame[total - 1] != FRAME_MARKER {
        return Err(ProtocolError::malformed_header(format!(
            "bad end marker {:#04x}",
            frame[total - 1]
        )));
    }

    let data = &frame[3..3 + length];
    let received = u16::from_le_bytes([frame[3 + length], frame[4 + length]]);
    let computed = crc16(data);
    if received != computed {
        return Err(ProtocolError::ChecksumMismatch {
            expected: computed,
            actual: received,
        });
    }
    Ok(Some(data))
}

/// Parse a CRC-validated DATA section
fn parse_data(data: &[u8]) -> Result<ParsedMessage> {
    if data.len() < DATA_HEADER_LEN {
        return Err(ProtocolError::malformed_header(format!(
            "data section of {} bytes is shorter than the {DATA_HEADER_LEN}-byte header",
            data.len()
        )));
    }

    let mut raw_id = [0u8; DEVICE_ID_LEN];
    raw_id.copy_from_slice(&data[..DEVICE_ID_LEN]);
    let device_id = DeviceId::from_raw(raw_id);
    let secs = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let device_time = payload::timestamp_from_secs(secs);
    let data_type = DataType::from_code(data[12]);

    let payload = payload::parse(data_type, &data[DATA_HEADER_LEN..], device_time)?;
    trace!(device_id = %device_id, ?data_type, "Frame parsed");

    Ok(ParsedMessage {
        device_id,
        device_time,
        data_type,
        payload,
    })
}

/// Wrap DATA in a fresh envelope.
///
/// DATA longer than `u16::MAX` is truncated to fit the length field.
pub fn build_frame(data: &[u8]) -> Bytes {
    let data = &data[..data.len().min(u16::MAX as usize)];
    let mut buf = BytesMut::with_capacity(data.len() + ENVELOPE_OVERHEAD);
    buf.put_u8(FRAME_MARKER);
    buf.put_u16_le(data.len() as u16);
    buf.put_slice(data);
    buf.put_u16_le(crc16(data));
    buf.put_u8(FRAME_MARKER);
    buf.freeze()
}

/// Build a DATA section
pub fn compose_data(
    device_id: &DeviceId,
    device_time: DateTime<Utc>,
    data_type: DataType,
    payload: &[u8],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATA_HEADER_LEN + payload.len());
    buf.put_slice(device_id.raw());
    buf.put_u32_le(device_time.timestamp().clamp(0, i64::from(u32::MAX)) as u32);
    buf.put_u8(data_type.code());
    buf.put_slice(payload);
    buf.freeze()
}

/// Positive reply for a parsed frame
pub fn build_ack(device_id: &DeviceId, data_type: DataType, status: AckStatus) -> Bytes {
    trace!(device_id = %device_id, ?data_type, "Building ACK");
    build_reply(ACK_FLAG, status.code(), device_id_hash(device_id.raw()))
}

/// Negative reply; hash is 0 when the device is not yet known
pub fn build_nack(device_id: Option<&DeviceId>, code: NackCode) -> Bytes {
    let hash = device_id.map_or(0, |id| device_id_hash(id.raw()));
    build_reply(NACK_FLAG, code.code(), hash)
}

fn build_reply(flag: u8, status: u8, hash: u16) -> Bytes {
    let mut data = [0u8; 4];
    data[0] = flag;
    data[1] = status;
    data[2..].copy_from_slice(&hash.to_le_bytes());
    build_frame(&data)
}

/// True when no marker byte occurs between the two boundary markers.
///
/// The envelope has no escaping, so a frame failing this check is split in
/// two by any marker-delimited reader.
pub fn is_stream_safe(frame: &[u8]) -> bool {
    frame.len() >= 2 && !frame[1..frame.len() - 1].contains(&FRAME_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{encode_event, encode_legacy_can};
    use contracts::{EventData, MessagePayload};

    fn device() -> DeviceId {
        DeviceId::from_raw([0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77])
    }

    fn time(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_round_trip_event() {
        let event = EventData {
            code: 0x0101,
            data: Bytes::from_static(&[0x01, 0x02]),
        };
        let data = compose_data(&device(), time(1_700_000_000), DataType::Event, &encode_event(&event));
        let frame = build_frame(&data);

        let FrameStatus::Complete(msg) = try_parse(&frame).unwrap() else {
            panic!("expected complete frame");
        };
        assert_eq!(msg.device_id, device());
        assert_eq!(msg.device_id.as_str(), "0011223344556677");
        assert_eq!(msg.device_time, time(1_700_000_000));
        assert_eq!(msg.data_type, DataType::Event);
        assert_eq!(msg.payload, MessagePayload::Event(event));
    }

    #[test]
    fn test_round_trip_legacy_can() {
        let body = encode_legacy_can(0x18F00400, &[0x00, 0x00, 0x00, 0x80, 0x3E]);
        let data = compose_data(&device(), time(1_600_000_000), DataType::Can, &body);
        let FrameStatus::Complete(msg) = try_parse(&build_frame(&data)).unwrap() else {
            panic!("expected complete frame");
        };
        assert_eq!(msg.can_frames().len(), 1);
        assert_eq!(msg.can_frames()[0].can_id, 0x18F00400);
    }

    #[test]
    fn test_short_input_is_incomplete() {
        assert_eq!(try_parse(&[]).unwrap(), FrameStatus::Incomplete);
        assert_eq!(try_parse(&[0x7E, 0x10]).unwrap(), FrameStatus::Incomplete);
    }

    #[test]
    fn test_unclosed_prefix_is_incomplete() {
        let data = compose_data(&device(), time(1), DataType::Unknown(0x09), &[1, 2, 3]);
        let frame = build_frame(&data);
        let prefix = &frame[..frame.len() - 3];
        assert_eq!(try_parse(prefix).unwrap(), FrameStatus::Incomplete);
    }

    #[test]
    fn test_declared_length_exceeds_closed_frame() {
        // LENGTH says 0x0040 but the frame closes after 3 data bytes
        let frame = [0x7E, 0x40, 0x00, 0x01, 0x02, 0x03, 0x7E];
        let err = try_parse(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader { .. }));
    }

    #[test]
    fn test_three_byte_closed_frame_is_malformed() {
        // extractor output for `7E 05 7E`: LENGTH reads 0x7E05, nothing follows
        let err = try_parse(&[0x7E, 0x05, 0x7E]).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader { .. }));
    }

    #[test]
    fn test_bad_start_marker() {
        let err = try_parse(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x7E]).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let data = compose_data(&device(), time(5), DataType::Unknown(0x09), &[]);
        let mut frame = build_frame(&data).to_vec();
        frame.push(0x7E);
        let err = try_parse(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader { .. }));
    }

    #[test]
    fn test_checksum_mismatch() {
        let data = compose_data(&device(), time(5), DataType::Unknown(0x09), &[0xAA]);
        let mut frame = build_frame(&data).to_vec();
        let crc_at = frame.len() - 3;
        frame[crc_at] ^= 0xFF;
        let err = try_parse(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_flipped_data_bit_detected() {
        let data = compose_data(&device(), time(5), DataType::Unknown(0x09), &[0x10, 0x20]);
        let mut frame = build_frame(&data).to_vec();
        frame[5] ^= 0x01;
        assert!(matches!(
            try_parse(&frame),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_short_data_section() {
        let frame = build_frame(&[0x01, 0x02, 0x03]);
        let err = try_parse(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader { .. }));
    }

    #[test]
    fn test_ack_layout() {
        let ack = build_ack(&device(), DataType::Gps, AckStatus::Ok);
        assert_eq!(ack.len(), 4 + ENVELOPE_OVERHEAD);
        assert_eq!(&ack[..3], &[0x7E, 0x04, 0x00]);
        assert_eq!(ack[3], 0x01);
        assert_eq!(ack[4], 0x00);
        let hash = device_id_hash(device().raw());
        assert_eq!(u16::from_le_bytes([ack[5], ack[6]]), hash);
        assert_eq!(u16::from_le_bytes([ack[7], ack[8]]), crc16(&ack[3..7]));
        assert_eq!(ack[9], 0x7E);
    }

    #[test]
    fn test_nack_without_device() {
        let nack = build_nack(None, NackCode::FormatError);
        assert_eq!(&nack[3..7], &[0x02, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_parse_reply() {
        let ack = parse_reply(&build_ack(&device(), DataType::Can, AckStatus::Ok)).unwrap();
        assert!(ack.positive);
        assert_eq!(ack.code, 0x00);
        assert_eq!(ack.device_hash, device_id_hash(device().raw()));

        let nack = parse_reply(&build_nack(Some(&device()), NackCode::CrcError)).unwrap();
        assert!(!nack.positive);
        assert_eq!(nack.code, 0x01);
    }

    #[test]
    fn test_parse_reply_rejects_data_frame() {
        let frame = build_frame(&compose_data(&device(), time(0), DataType::Gps, &[]));
        assert!(matches!(
            parse_reply(&frame),
            Err(ProtocolError::MalformedHeader { .. })
        ));
        assert!(parse_reply(&[0x7E, 0x04]).is_err());
    }

    #[test]
    fn test_stream_safety_check() {
        assert!(is_stream_safe(&[0x7E, 0x01, 0x7E]));
        assert!(!is_stream_safe(&[0x7E, 0x7E, 0x01, 0x7E]));
    }
}
