//! DictionaryFile - on-disk CAN dictionary schema
//!
//! One file describes either the J1939 PGN table, the OBD-II PID table, or a
//! brand pack layered over both.

use serde::{Deserialize, Serialize};

/// Which decoder slot a dictionary file targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryKind {
    J1939,
    Obd2,
    Brand,
}

impl DictionaryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::J1939 => "j1939",
            Self::Obd2 => "obd2",
            Self::Brand => "brand",
        }
    }
}

/// Parsed dictionary file, not yet compiled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryFile {
    pub kind: DictionaryKind,

    /// Explicit version label; derived from content when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Brand name (brand packs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    /// Inclusive CAN id ranges a brand pack claims
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub can_id_ranges: Vec<[u32; 2]>,

    /// PGN or CAN id keyed messages (J1939, brand)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<MessageDef>,

    /// PID formulas (OBD-II)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pids: Vec<PidDef>,
}

/// A message and the signals packed into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDef {
    /// PGN for 29-bit traffic, raw CAN id for 11-bit brand messages
    pub id: u32,

    #[serde(default)]
    pub name: String,

    pub signals: Vec<SignalDef>,
}

/// Bit layout of a signal inside a CAN payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spn: Option<u32>,

    pub name: String,

    pub start_bit: u16,

    pub bit_length: u8,

    #[serde(default)]
    pub byte_order: ByteOrder,

    #[serde(default = "default_scale")]
    pub scale: f64,

    #[serde(default)]
    pub offset: f64,

    #[serde(default)]
    pub unit: String,

    #[serde(default)]
    pub signed: bool,
}

fn default_scale() -> f64 {
    1.0
}

/// Signal byte order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Intel
    #[default]
    LittleEndian,
    /// Motorola
    BigEndian,
}

/// OBD-II PID with its arithmetic formula over bytes A..D
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidDef {
    pub pid: u8,

    /// Service byte of the response, 0x41 for current data
    #[serde(default = "default_obd_mode")]
    pub mode: u8,

    pub name: String,

    pub formula: String,

    #[serde(default)]
    pub unit: String,
}

fn default_obd_mode() -> u8 {
    0x41
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_defaults() {
        let json = r#"{"name":"rpm","start_bit":0,"bit_length":16}"#;
        let sig: SignalDef = serde_json::from_str(json).unwrap();
        assert_eq!(sig.scale, 1.0);
        assert_eq!(sig.offset, 0.0);
        assert_eq!(sig.byte_order, ByteOrder::LittleEndian);
        assert!(!sig.signed);
    }

    #[test]
    fn test_pid_default_mode() {
        let json = r#"{"pid":12,"name":"rpm","formula":"(A*256+B)/4"}"#;
        let pid: PidDef = serde_json::from_str(json).unwrap();
        assert_eq!(pid.mode, 0x41);
    }
}
