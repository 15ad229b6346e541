//! Shared decoder with hot-swappable dictionaries

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use config_loader::DictionaryLoader;
use contracts::{CanSignal, DeviceId, DictionariesConfig, DictionaryFile};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, instrument};

use crate::builtin;
use crate::decode::{decode_frame, DecodeInput};
use crate::dictionary::{compile, CompiledDictionary, DictionarySet, J1939_SLOT, OBD2_SLOT};
use crate::error::{DecoderError, Result};

/// Reload events kept for `reload_history`
pub const RELOAD_HISTORY_LEN: usize = 50;

/// One attempted dictionary swap
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReloadEvent {
    pub timestamp: DateTime<Utc>,
    pub slot: String,
    pub old_version: Option<String>,
    pub new_version: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// CAN decoder shared by every connection task.
///
/// Readers load one snapshot per `decode` call; reloads build a new
/// `DictionarySet` and swap it in, so a frame never sees a half-applied
/// reload.
pub struct DecoderContext {
    dictionaries: ArcSwap<DictionarySet>,
    history: Mutex<VecDeque<ReloadEvent>>,
}

impl Default for DecoderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderContext {
    /// Decoder over the built-in J1939 and OBD-II tables
    pub fn new() -> Self {
        let set = builtin_set();
        Self {
            dictionaries: ArcSwap::from_pointee(set),
            history: Mutex::new(VecDeque::with_capacity(RELOAD_HISTORY_LEN)),
        }
    }

    /// Built-ins overlaid with every configured dictionary file.
    ///
    /// Any unreadable or invalid file fails startup.
    pub fn from_config(config: &DictionariesConfig) -> Result<Self> {
        let ctx = Self::new();
        for (slot, path) in configured_slots(config) {
            ctx.reload_from_path(&slot, &path)?;
        }
        Ok(ctx)
    }

    /// Decode one CAN frame stamped with the current time
    pub fn decode(&self, can_id: u32, payload: &[u8], device_id: &DeviceId) -> Vec<CanSignal> {
        self.decode_at(can_id, payload, device_id, Utc::now())
    }

    /// Decode one CAN frame with an explicit timestamp.
    ///
    /// Unknown or undecodable traffic yields an empty vector.
    pub fn decode_at(
        &self,
        can_id: u32,
        payload: &[u8],
        device_id: &DeviceId,
        timestamp: DateTime<Utc>,
    ) -> Vec<CanSignal> {
        let set = self.dictionaries.load();
        decode_frame(
            &set,
            &DecodeInput {
                can_id,
                payload,
                device_id,
                timestamp,
            },
        )
    }

    /// Compile `file` for slot `name` and swap it in.
    ///
    /// On failure the active dictionary is untouched.
    #[instrument(name = "dictionary_reload", skip(self, file), fields(slot = %name))]
    pub fn reload_dictionary(&self, name: &str, file: &DictionaryFile) -> Result<String> {
        let old_version = self.version(name);
        match compile(name, file) {
            Ok(compiled) => {
                let new_version = compiled.version().to_string();
                self.swap_in(compiled);
                info!(
                    old_version = old_version.as_deref().unwrap_or("-"),
                    new_version = %new_version,
                    "Dictionary reloaded"
                );
                metrics::counter!("dictionary_reloads_total", "outcome" => "ok").increment(1);
                self.record(ReloadEvent {
                    timestamp: Utc::now(),
                    slot: name.to_string(),
                    old_version,
                    new_version: Some(new_version.clone()),
                    success: true,
                    error: None,
                });
                Ok(new_version)
            }
            Err(e) => {
                error!(error = %e, "Dictionary reload failed, keeping previous version");
                metrics::counter!("dictionary_reloads_total", "outcome" => "error").increment(1);
                self.record(ReloadEvent {
                    timestamp: Utc::now(),
                    slot: name.to_string(),
                    old_version,
                    new_version: None,
                    success: false,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    /// Load a dictionary file and swap it into slot `name`
    pub fn reload_from_path(&self, name: &str, path: &Path) -> Result<String> {
        let file = match DictionaryLoader::load_from_path(path) {
            Ok(file) => file,
            Err(e) => {
                let err = DecoderError::from(e);
                error!(slot = %name, path = %path.display(), error = %err, "Dictionary file rejected");
                self.record(ReloadEvent {
                    timestamp: Utc::now(),
                    slot: name.to_string(),
                    old_version: self.version(name),
                    new_version: None,
                    success: false,
                    error: Some(err.to_string()),
                });
                return Err(err);
            }
        };
        self.reload_dictionary(name, &file)
    }

    /// Reload every slot named in `config`; one outcome per slot
    pub fn reload_configured(&self, config: &DictionariesConfig) -> Vec<(String, Result<String>)> {
        configured_slots(config)
            .into_iter()
            .map(|(slot, path)| {
                let outcome = self.reload_from_path(&slot, &path);
                (slot, outcome)
            })
            .collect()
    }

    /// Compile without swapping; returns the version it would get
    pub fn validate_dictionary(&self, name: &str, file: &DictionaryFile) -> Result<String> {
        compile(name, file).map(|c| c.version().to_string())
    }

    /// Active version of a slot
    pub fn version(&self, name: &str) -> Option<String> {
        self.dictionaries.load().version_of(name).map(String::from)
    }

    /// Names of loaded brand packs, in match order
    pub fn brand_packs(&self) -> Vec<String> {
        self.dictionaries
            .load()
            .brands
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Most recent reload events, newest last
    pub fn reload_history(&self, limit: usize) -> Vec<ReloadEvent> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    fn swap_in(&self, compiled: CompiledDictionary) {
        self.dictionaries.rcu(|current| current.with(compiled.clone()));
    }

    fn record(&self, event: ReloadEvent) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() == RELOAD_HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(event);
    }
}

fn configured_slots(config: &DictionariesConfig) -> Vec<(String, std::path::PathBuf)> {
    let mut slots = Vec::new();
    if let Some(path) = &config.j1939 {
        slots.push((J1939_SLOT.to_string(), path.clone()));
    }
    if let Some(path) = &config.obd2 {
        slots.push((OBD2_SLOT.to_string(), path.clone()));
    }
    for pack in &config.brand_packs {
        slots.push((pack.name.clone(), pack.path.clone()));
    }
    slots
}

fn builtin_set() -> DictionarySet {
    DictionarySet {
        j1939: Arc::new(builtin::j1939_table()),
        obd2: Arc::new(builtin::obd2_table()),
        brands: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ByteOrder, DictionaryKind, MessageDef, PidDef, SignalDef};
    use std::io::Write;

    fn device() -> DeviceId {
        DeviceId::from_raw([0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88])
    }

    fn signal(name: &str, start_bit: u16, bit_length: u8, scale: f64) -> SignalDef {
        SignalDef {
            spn: None,
            name: name.into(),
            start_bit,
            bit_length,
            byte_order: ByteOrder::LittleEndian,
            scale,
            offset: 0.0,
            unit: "u".into(),
            signed: false,
        }
    }

    fn j1939_file(version: &str, scale: f64) -> DictionaryFile {
        DictionaryFile {
            kind: DictionaryKind::J1939,
            version: Some(version.into()),
            brand: None,
            can_id_ranges: vec![],
            messages: vec![MessageDef {
                id: 0xF004,
                name: "EEC1".into(),
                signals: vec![signal("EngineRPM", 0, 16, scale)],
            }],
            pids: vec![],
        }
    }

    fn brand_file(ranges: Vec<[u32; 2]>, id: u32, name: &str) -> DictionaryFile {
        DictionaryFile {
            kind: DictionaryKind::Brand,
            version: Some("b1".into()),
            brand: Some("acme".into()),
            can_id_ranges: ranges,
            messages: vec![MessageDef {
                id,
                name: "M".into(),
                signals: vec![signal(name, 0, 8, 1.0)],
            }],
            pids: vec![],
        }
    }

    #[test]
    fn test_builtin_j1939_rpm() {
        let ctx = DecoderContext::new();
        let signals = ctx.decode(0x0CF0_0400, &[0x00, 0x80], &device());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].name, "EngineRPM");
        assert_eq!(signals[0].value, 4096.0);
        assert_eq!(signals[0].pgn, Some(0xF004));
        assert_eq!(signals[0].dict_version, builtin::BUILTIN_VERSION);
    }

    #[test]
    fn test_builtin_obd_pids() {
        let ctx = DecoderContext::new();
        let rpm = ctx.decode(0x7E8, &[0x04, 0x41, 0x0C, 0x1A, 0xF8, 0, 0, 0], &device());
        assert_eq!(rpm.len(), 1);
        assert_eq!(rpm[0].value, 1726.0);
        assert_eq!(rpm[0].mode, Some(0x41));
        assert_eq!(rpm[0].pid, Some(0x0C));

        let temp = ctx.decode(0x7E9, &[0x03, 0x41, 0x05, 0x5A], &device());
        assert_eq!(temp[0].value, 50.0);
    }

    #[test]
    fn test_obd_length_byte_bounds_data() {
        let ctx = DecoderContext::new();
        // len 3 covers only A; padding must not stand in for B
        let signals = ctx.decode(0x7E8, &[0x03, 0x41, 0x0C, 0x1A, 0xF8, 0, 0, 0], &device());
        assert!(signals.is_empty());
    }

    #[test]
    fn test_obd_other_modes_ignored() {
        let ctx = DecoderContext::new();
        assert!(ctx.decode(0x7E8, &[0x03, 0x42, 0x0D, 0x3C], &device()).is_empty());
        assert!(ctx.decode(0x7E0, &[0x03, 0x41, 0x0D, 0x3C], &device()).is_empty());
    }

    #[test]
    fn test_unknown_traffic_is_empty() {
        let ctx = DecoderContext::new();
        assert!(ctx.decode(0x123, &[1, 2, 3], &device()).is_empty());
        assert!(ctx.decode(0x18FF_0000, &[1, 2, 3], &device()).is_empty());
        assert!(ctx.decode(0x0CF0_0400, &[], &device()).is_empty());
    }

    #[test]
    fn test_reload_swaps_version() {
        let ctx = DecoderContext::new();
        let version = ctx.reload_dictionary(J1939_SLOT, &j1939_file("v2", 1.0)).unwrap();
        assert_eq!(version, "v2");
        let signals = ctx.decode(0x0CF0_0400, &[0x00, 0x80], &device());
        assert_eq!(signals[0].value, 32768.0);
        assert_eq!(signals[0].dict_version, "v2");
    }

    #[test]
    fn test_failed_reload_keeps_old_dictionary() {
        let ctx = DecoderContext::new();
        ctx.reload_dictionary(J1939_SLOT, &j1939_file("v2", 1.0)).unwrap();

        let mut bad = j1939_file("v3", 1.0);
        bad.messages[0].signals[0].bit_length = 0;
        assert!(ctx.reload_dictionary(J1939_SLOT, &bad).is_err());
        assert_eq!(ctx.version(J1939_SLOT).as_deref(), Some("v2"));

        let wrong_kind = DictionaryFile {
            kind: DictionaryKind::Obd2,
            ..j1939_file("v4", 1.0)
        };
        let err = ctx.reload_dictionary(J1939_SLOT, &wrong_kind).unwrap_err();
        assert!(matches!(err, DecoderError::DictionaryLoad { .. }));
        assert_eq!(ctx.version(J1939_SLOT).as_deref(), Some("v2"));
    }

    #[test]
    fn test_brand_pack_precedence() {
        let ctx = DecoderContext::new();
        ctx.reload_dictionary(
            "acme",
            &brand_file(vec![[0x0CF0_0000, 0x0CF0_FFFF]], 0xF004, "AcmeRPM"),
        )
        .unwrap();

        let signals = ctx.decode(0x0CF0_0400, &[0x10, 0x00], &device());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].name, "AcmeRPM");
        assert_eq!(signals[0].dict_version, "b1");

        // outside the pack's range: standard J1939
        let signals = ctx.decode(0x18F0_0400, &[0x00, 0x80], &device());
        assert_eq!(signals[0].name, "EngineRPM");
    }

    #[test]
    fn test_brand_pack_without_message_falls_through() {
        let ctx = DecoderContext::new();
        ctx.reload_dictionary(
            "acme",
            &brand_file(vec![[0x0C00_0000, 0x0CFF_FFFF]], 0xFEEE, "Other"),
        )
        .unwrap();
        let signals = ctx.decode(0x0CF0_0400, &[0x00, 0x80], &device());
        assert_eq!(signals[0].name, "EngineRPM");
    }

    #[test]
    fn test_brand_pack_standard_ids_keyed_by_can_id() {
        let ctx = DecoderContext::new();
        ctx.reload_dictionary("acme", &brand_file(vec![[0x100, 0x1FF]], 0x123, "DoorState"))
            .unwrap();
        let signals = ctx.decode(0x123, &[0x07], &device());
        assert_eq!(signals[0].name, "DoorState");
        assert_eq!(signals[0].value, 7.0);
        assert_eq!(signals[0].pgn, None);
        assert_eq!(ctx.brand_packs(), vec!["acme".to_string()]);
    }

    #[test]
    fn test_reload_history_bounded() {
        let ctx = DecoderContext::new();
        for i in 0..(RELOAD_HISTORY_LEN + 5) {
            ctx.reload_dictionary(J1939_SLOT, &j1939_file(&format!("v{i}"), 1.0))
                .unwrap();
        }
        let history = ctx.reload_history(usize::MAX);
        assert_eq!(history.len(), RELOAD_HISTORY_LEN);
        assert_eq!(history.last().unwrap().new_version.as_deref(), Some("v54"));
        assert_eq!(history.last().unwrap().old_version.as_deref(), Some("v53"));

        let recent = ctx.reload_history(2);
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|e| e.success));
    }

    #[test]
    fn test_validate_is_dry_run() {
        let ctx = DecoderContext::new();
        let version = ctx.validate_dictionary(J1939_SLOT, &j1939_file("v9", 1.0)).unwrap();
        assert_eq!(version, "v9");
        assert_eq!(ctx.version(J1939_SLOT).as_deref(), Some(builtin::BUILTIN_VERSION));
        assert!(ctx.reload_history(10).is_empty());
    }

    #[test]
    fn test_reload_from_path() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        let obd = DictionaryFile {
            kind: DictionaryKind::Obd2,
            version: None,
            brand: None,
            can_id_ranges: vec![],
            messages: vec![],
            pids: vec![PidDef {
                pid: 0x0D,
                mode: 0x41,
                name: "Speed".into(),
                formula: "A * 2".into(),
                unit: "km/h".into(),
            }],
        };
        file.write_all(serde_json::to_string(&obd).unwrap().as_bytes())
            .unwrap();

        let ctx = DecoderContext::new();
        let version = ctx.reload_from_path(OBD2_SLOT, file.path()).unwrap();
        assert_eq!(version.len(), 8);
        let signals = ctx.decode(0x7E8, &[0x03, 0x41, 0x0D, 0x3C], &device());
        assert_eq!(signals[0].value, 120.0);
        assert_eq!(signals[0].name, "Speed");
    }

    #[test]
    fn test_missing_file_recorded() {
        let ctx = DecoderContext::new();
        let err = ctx
            .reload_from_path(J1939_SLOT, Path::new("/nonexistent/j1939.toml"))
            .unwrap_err();
        assert!(matches!(err, DecoderError::DictionaryLoad { .. }));
        let history = ctx.reload_history(1);
        assert!(!history[0].success);
        assert!(history[0].error.is_some());
    }
}
