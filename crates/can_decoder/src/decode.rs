//! Frame to signal decoding against one dictionary snapshot

use chrono::{DateTime, Utc};
use contracts::{CanSignal, DeviceId};

use crate::bits;
use crate::dictionary::{CompiledMessage, DictionarySet, ObdTable};

const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
const MAX_STANDARD_ID: u32 = 0x7FF;
/// OBD-II ECU response ids
pub const OBD_RESPONSE_IDS: std::ops::RangeInclusive<u32> = 0x7E8..=0x7EF;
/// Mode 01 response service byte
pub const OBD_MODE_CURRENT: u8 = 0x41;

/// J1939 fields of a 29-bit identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct J1939Id {
    pub priority: u8,
    pub pgn: u32,
    pub source_address: u8,
}

impl J1939Id {
    /// PDU1 formats (PF < 240) carry a destination in PS, which is not part
    /// of the PGN.
    pub fn from_can_id(can_id: u32) -> Self {
        let id = can_id & CAN_EFF_MASK;
        let mut pgn = (id >> 8) & 0x3FFFF;
        let pf = (pgn >> 8) & 0xFF;
        if pf < 240 {
            pgn &= 0x3FF00;
        }
        Self {
            priority: ((id >> 26) & 0x7) as u8,
            pgn,
            source_address: (id & 0xFF) as u8,
        }
    }
}

pub(crate) struct DecodeInput<'a> {
    pub can_id: u32,
    pub payload: &'a [u8],
    pub device_id: &'a DeviceId,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn decode_frame(set: &DictionarySet, input: &DecodeInput<'_>) -> Vec<CanSignal> {
    let id = input.can_id & CAN_EFF_MASK;
    let j1939 = (id > MAX_STANDARD_ID).then(|| J1939Id::from_can_id(id));
    let key = j1939.map_or(id, |j| j.pgn);
    let pgn = j1939.map(|j| j.pgn);

    for pack in &set.brands {
        if !pack.claims(id) {
            continue;
        }
        if let Some(message) = pack.messages.get(&key) {
            return decode_message(message, pgn, &pack.version, input);
        }
    }

    if let Some(j) = j1939 {
        return set
            .j1939
            .messages
            .get(&j.pgn)
            .map(|m| decode_message(m, Some(j.pgn), &set.j1939.version, input))
            .unwrap_or_default();
    }

    if OBD_RESPONSE_IDS.contains(&id) {
        return decode_obd(&set.obd2, input).into_iter().collect();
    }

    Vec::new()
}

fn decode_message(
    message: &CompiledMessage,
    pgn: Option<u32>,
    version: &str,
    input: &DecodeInput<'_>,
) -> Vec<CanSignal> {
    message
        .signals
        .iter()
        .filter_map(|def| {
            let value = bits::decode_value(input.payload, def)?;
            Some(CanSignal {
                device_id: input.device_id.clone(),
                name: def.name.clone(),
                value,
                unit: def.unit.clone(),
                pgn,
                spn: def.spn,
                mode: None,
                pid: None,
                dict_version: version.to_string(),
                timestamp: input.timestamp,
            })
        })
        .collect()
}

/// `[len, mode, pid, A, B, C, D...]`
fn decode_obd(table: &ObdTable, input: &DecodeInput<'_>) -> Option<CanSignal> {
    let payload = input.payload;
    if payload.len() < 3 {
        return None;
    }
    let (len, mode, pid) = (payload[0], payload[1], payload[2]);
    if mode != OBD_MODE_CURRENT {
        return None;
    }
    let entry = table.pids.get(&(mode, pid))?;
    let end = payload.len().min(1 + usize::from(len));
    let data = payload.get(3..end).unwrap_or_default();
    let value = entry.formula.evaluate(data)?;

    Some(CanSignal {
        device_id: input.device_id.clone(),
        name: entry.name.clone(),
        value,
        unit: entry.unit.clone(),
        pgn: None,
        spn: None,
        mode: Some(mode),
        pid: Some(pid),
        dict_version: table.version.clone(),
        timestamp: input.timestamp,
    })
}
