//! Compiled dictionaries and the set swapped atomically on reload

use contracts::{DictionaryFile, DictionaryKind, SignalDef};
use crc::{Crc, CRC_32_ISO_HDLC};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::error::{DecoderError, Result};
use crate::formula::Formula;

const VERSION_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Slot name of the J1939 dictionary
pub const J1939_SLOT: &str = "j1939";
/// Slot name of the OBD-II dictionary
pub const OBD2_SLOT: &str = "obd2";

/// Version label: the file's own, else CRC-32 of its JSON form
pub fn dictionary_version(file: &DictionaryFile) -> String {
    if let Some(version) = file.version.as_deref().filter(|v| !v.is_empty()) {
        return version.to_string();
    }
    let canonical = serde_json::to_vec(file).unwrap_or_default();
    format!("{:08x}", VERSION_CRC.checksum(&canonical))
}

/// Signals of one message
#[derive(Debug, Clone)]
pub struct CompiledMessage {
    pub name: String,
    pub signals: Vec<SignalDef>,
}

/// PGN-keyed J1939 table
#[derive(Debug, Clone)]
pub struct J1939Table {
    pub version: String,
    pub messages: HashMap<u32, CompiledMessage>,
}

/// One OBD-II PID and its parsed formula
#[derive(Debug, Clone)]
pub struct CompiledPid {
    pub name: String,
    pub unit: String,
    pub formula: Formula,
}

/// `(mode, pid)` keyed OBD-II table
#[derive(Debug, Clone)]
pub struct ObdTable {
    pub version: String,
    pub pids: HashMap<(u8, u8), CompiledPid>,
}

/// Brand-specific messages claimed by CAN id range
#[derive(Debug, Clone)]
pub struct BrandPack {
    pub name: String,
    pub version: String,
    pub ranges: Vec<RangeInclusive<u32>>,
    /// Keyed by PGN for 29-bit ids, raw id for 11-bit ids
    pub messages: HashMap<u32, CompiledMessage>,
}

impl BrandPack {
    pub fn claims(&self, can_id: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(&can_id))
    }
}

/// Result of compiling one file for one slot
#[derive(Debug, Clone)]
pub enum CompiledDictionary {
    J1939(J1939Table),
    Obd2(ObdTable),
    Brand(BrandPack),
}

impl CompiledDictionary {
    pub fn version(&self) -> &str {
        match self {
            Self::J1939(t) => &t.version,
            Self::Obd2(t) => &t.version,
            Self::Brand(p) => &p.version,
        }
    }
}

/// Compile `file` for slot `name`.
///
/// `name` is `j1939`, `obd2`, or a brand pack name; the file kind must match.
pub fn compile(name: &str, file: &DictionaryFile) -> Result<CompiledDictionary> {
    let expected = slot_kind(name);
    if file.kind != expected {
        return Err(DecoderError::dictionary_load(
            name,
            format!(
                "slot expects a {} dictionary, file is {}",
                expected.as_str(),
                file.kind.as_str()
            ),
        ));
    }
    config_loader::DictionaryLoader::validate(name, file)?;

    let version = dictionary_version(file);
    let compiled = match file.kind {
        DictionaryKind::J1939 => CompiledDictionary::J1939(J1939Table {
            version,
            messages: compile_messages(file),
        }),
        DictionaryKind::Obd2 => {
            let mut pids = HashMap::with_capacity(file.pids.len());
            for def in &file.pids {
                let formula = Formula::parse(&def.formula).map_err(|e| {
                    DecoderError::dictionary_load(name, format!("pid {:#04x}: {e}", def.pid))
                })?;
                pids.insert(
                    (def.mode, def.pid),
                    CompiledPid {
                        name: def.name.clone(),
                        unit: def.unit.clone(),
                        formula,
                    },
                );
            }
            CompiledDictionary::Obd2(ObdTable { version, pids })
        }
        DictionaryKind::Brand => CompiledDictionary::Brand(BrandPack {
            name: name.to_string(),
            version,
            ranges: file
                .can_id_ranges
                .iter()
                .map(|[lo, hi]| *lo..=*hi)
                .collect(),
            messages: compile_messages(file),
        }),
    };
    Ok(compiled)
}

fn slot_kind(name: &str) -> DictionaryKind {
    match name {
        J1939_SLOT => DictionaryKind::J1939,
        OBD2_SLOT => DictionaryKind::Obd2,
        _ => DictionaryKind::Brand,
    }
}

pub(crate) fn compile_messages(file: &DictionaryFile) -> HashMap<u32, CompiledMessage> {
    file.messages
        .iter()
        .map(|m| {
            (
                m.id,
                CompiledMessage {
                    name: m.name.clone(),
                    signals: m.signals.clone(),
                },
            )
        })
        .collect()
}

/// Everything the decoder reads during one `decode` call
#[derive(Debug, Clone)]
pub struct DictionarySet {
    pub j1939: Arc<J1939Table>,
    pub obd2: Arc<ObdTable>,
    /// Load order is match order
    pub brands: Vec<Arc<BrandPack>>,
}

impl DictionarySet {
    /// Version currently held by a slot
    pub fn version_of(&self, name: &str) -> Option<&str> {
        match name {
            J1939_SLOT => Some(&self.j1939.version),
            OBD2_SLOT => Some(&self.obd2.version),
            _ => self
                .brands
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.version.as_str()),
        }
    }

    /// Copy of this set with one slot replaced.
    ///
    /// A reloaded brand pack keeps its position; a new one is appended.
    pub fn with(&self, compiled: CompiledDictionary) -> Self {
        let mut next = self.clone();
        match compiled {
            CompiledDictionary::J1939(t) => next.j1939 = Arc::new(t),
            CompiledDictionary::Obd2(t) => next.obd2 = Arc::new(t),
            CompiledDictionary::Brand(p) => {
                match next.brands.iter_mut().find(|b| b.name == p.name) {
                    Some(slot) => *slot = Arc::new(p),
                    None => next.brands.push(Arc::new(p)),
                }
            }
        }
        next
    }
}
