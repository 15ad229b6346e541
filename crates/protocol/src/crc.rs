//! CRC16 used by the Navtelecom envelope
//!
//! Reflected polynomial 0xA001, seed 0xFFFF, no final xor, over DATA only.

use crc::{Crc, CRC_16_MODBUS};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC16 of `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Correlation hash echoed in ACK/NACK replies
///
/// Derived from the raw id bytes so it is stable across restarts.
pub fn device_id_hash(raw_id: &[u8]) -> u16 {
    crc16(raw_id)
}
