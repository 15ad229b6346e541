//! TP frame classification from CAN id and first payload byte

use bytes::Bytes;

/// Usable data bytes per TP.DT frame
pub const TP_DATA_BYTES: usize = 7;

const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
const PF_TP_CM: u32 = 0xEC;
const PF_TP_DT: u32 = 0xEB;

const CTRL_RTS: u8 = 0x10;
const CTRL_CTS: u8 = 0x11;
const CTRL_EOM: u8 = 0x13;
const CTRL_BAM: u8 = 0x20;

/// True when the id sits in the TP.CM / TP.DT control space.
///
/// Only the PDU-format byte is inspected; the PGN a transfer announces never
/// makes a frame TP traffic.
pub fn is_tp_frame(can_id: u32) -> bool {
    let id = can_id & CAN_EFF_MASK;
    if id <= 0x7FF {
        return false;
    }
    let pf = (id >> 16) & 0xFF;
    pf == PF_TP_CM || pf == PF_TP_DT
}

/// Decoded control byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpControl {
    /// Broadcast announce; up to 4 inline data bytes
    Bam { total_size: u16, inline: Bytes },
    /// Request to send
    Rts { total_size: u16 },
    /// Clear to send; liveness only
    Cts,
    /// Data packet
    Data { sequence: u8, data: Bytes },
    /// End of message; completion check only
    EndOfMessage,
}

/// A CAN frame recognised as TP traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpFrame {
    /// Connection PGN, TP.DT normalised to TP.CM
    pub pgn: u32,
    pub source_address: u8,
    pub session_id: u8,
    pub control: TpControl,
}

impl TpFrame {
    /// Classify a frame; `None` for non-TP traffic or unusable payloads.
    pub fn parse(can_id: u32, payload: &[u8]) -> Option<Self> {
        if !is_tp_frame(can_id) {
            return None;
        }
        let id = can_id & CAN_EFF_MASK;
        let pgn = (id >> 8) & 0x3FFFF;
        // keep DP/EDP and the destination byte so CM and DT share a key
        let pgn = (pgn & 0x300FF) | (PF_TP_CM << 8);
        let source_address = (id & 0xFF) as u8;

        let (&control, rest) = payload.split_first()?;
        let (session_id, control) = match control {
            CTRL_BAM => {
                if payload.len() < 4 {
                    return None;
                }
                let total_size = u16::from_be_bytes([payload[1], payload[2]]);
                let inline_end = payload.len().min(8);
                let inline = Bytes::copy_from_slice(&payload[4..inline_end]);
                (payload[3], TpControl::Bam { total_size, inline })
            }
            CTRL_RTS => {
                if payload.len() < 4 {
                    return None;
                }
                let total_size = u16::from_be_bytes([payload[1], payload[2]]);
                (payload[3], TpControl::Rts { total_size })
            }
            CTRL_CTS => (*rest.first()?, TpControl::Cts),
            CTRL_EOM => (*rest.first()?, TpControl::EndOfMessage),
            seq if seq & 0xF0 == 0x00 => {
                let session_id = *rest.first()?;
                let data_end = payload.len().min(2 + TP_DATA_BYTES);
                let data = Bytes::copy_from_slice(payload.get(2..data_end).unwrap_or_default());
                (
                    session_id,
                    TpControl::Data {
                        sequence: seq & 0x0F,
                        data,
                    },
                )
            }
            _ => return None,
        };

        Some(Self {
            pgn,
            source_address,
            session_id,
            control,
        })
    }
}
