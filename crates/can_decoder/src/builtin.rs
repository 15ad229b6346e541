//! Default dictionaries used when no file is configured

use contracts::{ByteOrder, DictionaryFile, DictionaryKind, MessageDef, PidDef, SignalDef};

use crate::dictionary::{compile_messages, CompiledPid, J1939Table, ObdTable};
use crate::formula::Formula;

/// Version label of the built-in tables
pub const BUILTIN_VERSION: &str = "builtin";

/// Engine speed, vehicle speed, fuel level and coolant temperature
pub fn j1939() -> DictionaryFile {
    let message = |id: u32, name: &str, signal: SignalDef| MessageDef {
        id,
        name: name.to_string(),
        signals: vec![signal],
    };
    DictionaryFile {
        kind: DictionaryKind::J1939,
        version: Some(BUILTIN_VERSION.to_string()),
        brand: None,
        can_id_ranges: Vec::new(),
        messages: vec![
            message(0xF004, "EEC1", signal(Some(190), "EngineRPM", 16, 0.125, 0.0, "rpm")),
            message(
                0xF003,
                "EEC2",
                signal(Some(84), "VehicleSpeed", 16, 1.0 / 256.0, 0.0, "km/h"),
            ),
            message(0xF00C, "DD", signal(Some(96), "FuelLevel", 8, 0.4, 0.0, "%")),
            message(0xFEEE, "ET1", signal(Some(110), "EngineTemp", 8, 1.0, -40.0, "°C")),
        ],
        pids: Vec::new(),
    }
}

/// Common mode 01 PIDs
pub fn obd2() -> DictionaryFile {
    let pid = |pid: u8, name: &str, formula: &str, unit: &str| PidDef {
        pid,
        mode: 0x41,
        name: name.to_string(),
        formula: formula.to_string(),
        unit: unit.to_string(),
    };
    DictionaryFile {
        kind: DictionaryKind::Obd2,
        version: Some(BUILTIN_VERSION.to_string()),
        brand: None,
        can_id_ranges: Vec::new(),
        messages: Vec::new(),
        pids: vec![
            pid(0x05, "EngineCoolantTemp", "A - 40", "°C"),
            pid(0x0C, "EngineRPM", "(A*256 + B) / 4", "rpm"),
            pid(0x0D, "VehicleSpeed", "A", "km/h"),
            pid(0x0F, "IntakeAirTemp", "A - 40", "°C"),
            pid(0x10, "MAFAirFlow", "(A*256 + B) / 100", "g/s"),
            pid(0x11, "ThrottlePosition", "A * 100 / 255", "%"),
        ],
    }
}

/// Compiled form of [`j1939`]
pub fn j1939_table() -> J1939Table {
    J1939Table {
        version: BUILTIN_VERSION.to_string(),
        messages: compile_messages(&j1939()),
    }
}

/// Compiled form of [`obd2`]
pub fn obd2_table() -> ObdTable {
    let pids = obd2()
        .pids
        .into_iter()
        .filter_map(|def| {
            let formula = Formula::parse(&def.formula).ok()?;
            Some((
                (def.mode, def.pid),
                CompiledPid {
                    name: def.name,
                    unit: def.unit,
                    formula,
                },
            ))
        })
        .collect();
    ObdTable {
        version: BUILTIN_VERSION.to_string(),
        pids,
    }
}

fn signal(
    spn: Option<u32>,
    name: &str,
    bit_length: u8,
    scale: f64,
    offset: f64,
    unit: &str,
) -> SignalDef {
    SignalDef {
        spn,
        name: name.to_string(),
        start_bit: 0,
        bit_length,
        byte_order: ByteOrder::LittleEndian,
        scale,
        offset,
        unit: unit.to_string(),
        signed: false,
    }
}
