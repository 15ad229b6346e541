//! # CAN Decoder
//!
//! Turns CAN frames into named engineering values.
//!
//! - J1939: PGN-keyed signal tables with bit layout, scale and offset
//! - OBD-II: mode 01 PIDs evaluated through a sandboxed arithmetic formula
//! - Brand packs: id-range scoped overrides, checked before both
//!
//! Dictionaries live behind an `ArcSwap` in [`DecoderContext`] and can be
//! replaced while connections are decoding.

mod bits;
mod builtin;
mod context;
mod decode;
mod dictionary;
mod error;
mod formula;

pub use bits::{decode_value, extract_big_endian, extract_little_endian, sign_extend};
pub use builtin::BUILTIN_VERSION;
pub use context::{DecoderContext, ReloadEvent, RELOAD_HISTORY_LEN};
pub use decode::{J1939Id, OBD_MODE_CURRENT, OBD_RESPONSE_IDS};
pub use dictionary::{dictionary_version, J1939_SLOT, OBD2_SLOT};
pub use error::{DecoderError, Result};
pub use formula::{Formula, MAX_FORMULA_DEPTH, MAX_FORMULA_LEN};
