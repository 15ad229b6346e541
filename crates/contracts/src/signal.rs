//! CanSignal - decoder output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DeviceId;

/// One decoded engineering value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanSignal {
    pub device_id: DeviceId,

    /// Signal name from the dictionary
    pub name: String,

    pub value: f64,

    pub unit: String,

    /// J1939 parameter group, when decoded through a PGN dictionary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgn: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spn: Option<u32>,

    /// OBD-II service byte, when decoded through the OBD-II dictionary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u8>,

    /// Version of the dictionary that produced the value
    pub dict_version: String,

    pub timestamp: DateTime<Utc>,
}
