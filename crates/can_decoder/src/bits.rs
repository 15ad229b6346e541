//! Raw bit-field extraction from CAN payloads

use contracts::{ByteOrder, SignalDef};

/// Physical value of a signal, or `None` when it does not fit in `data`.
pub fn decode_value(data: &[u8], signal: &SignalDef) -> Option<f64> {
    let start = usize::from(signal.start_bit);
    let length = usize::from(signal.bit_length);
    if length == 0 || length > 64 {
        return None;
    }
    let end_bit = start + length;
    if end_bit.div_ceil(8) > data.len() {
        return None;
    }

    let raw = match signal.byte_order {
        ByteOrder::LittleEndian => extract_little_endian(data, start, length),
        ByteOrder::BigEndian => extract_big_endian(data, start, length),
    };
    let raw = if signal.signed {
        sign_extend(raw, length) as f64
    } else {
        raw as f64
    };
    Some(raw * signal.scale + signal.offset)
}

/// Intel layout: `start_bit` is the LSB, numbered LSB-first across bytes.
pub fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result = 0u64;
    for i in 0..length {
        let bit_pos = start_bit + i;
        let Some(byte) = data.get(bit_pos / 8) else {
            break;
        };
        let bit = (byte >> (bit_pos % 8)) & 1;
        result |= u64::from(bit) << i;
    }
    result
}

/// Motorola layout: bits numbered MSB-first from bit 7 of byte 0, value
/// assembled MSB first.
pub fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result = 0u64;
    for i in 0..length {
        let bit_pos = start_bit + i;
        let Some(byte) = data.get(bit_pos / 8) else {
            break;
        };
        let bit = (byte >> (7 - bit_pos % 8)) & 1;
        result |= u64::from(bit) << (length - 1 - i);
    }
    result
}

/// Two's complement widening of a `bit_length`-bit value
pub fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length == 0 || bit_length >= 64 {
        return value as i64;
    }
    let sign_bit = 1u64 << (bit_length - 1);
    if value & sign_bit != 0 {
        (value | (!0u64 << bit_length)) as i64
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(start_bit: u16, bit_length: u8, byte_order: ByteOrder) -> SignalDef {
        SignalDef {
            spn: None,
            name: "s".into(),
            start_bit,
            bit_length,
            byte_order,
            scale: 1.0,
            offset: 0.0,
            unit: String::new(),
            signed: false,
        }
    }

    #[test]
    fn test_little_endian_cross_byte() {
        assert_eq!(extract_little_endian(&[0x34, 0x12], 0, 16), 0x1234);
        assert_eq!(extract_little_endian(&[0xF0, 0x0F], 4, 8), 0xFF);
        assert_eq!(extract_little_endian(&[0x00, 0x80], 0, 16), 0x8000);
    }

    #[test]
    fn test_big_endian_cross_byte() {
        assert_eq!(extract_big_endian(&[0x12, 0x34], 0, 16), 0x1234);
        assert_eq!(extract_big_endian(&[0x0F, 0xF0], 4, 8), 0xFF);
        assert_eq!(extract_big_endian(&[0xA0], 0, 3), 0b101);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(sign_extend(0xFF, 8), -1);
        assert_eq!(sign_extend(0x8000, 16), -32768);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn test_scale_and_offset() {
        let mut rpm = signal(0, 16, ByteOrder::LittleEndian);
        rpm.scale = 0.125;
        assert_eq!(decode_value(&[0x00, 0x80], &rpm), Some(4096.0));

        let mut temp = signal(0, 8, ByteOrder::LittleEndian);
        temp.offset = -40.0;
        assert_eq!(decode_value(&[0x5A], &temp), Some(50.0));
    }

    #[test]
    fn test_signed_value() {
        let mut s = signal(0, 8, ByteOrder::LittleEndian);
        s.signed = true;
        assert_eq!(decode_value(&[0xFE], &s), Some(-2.0));
    }

    #[test]
    fn test_signal_past_payload_is_skipped() {
        let s = signal(24, 16, ByteOrder::LittleEndian);
        assert_eq!(decode_value(&[0; 4], &s), None);
        assert!(decode_value(&[0; 5], &s).is_some());
        assert_eq!(decode_value(&[], &signal(0, 1, ByteOrder::BigEndian)), None);
    }
}
