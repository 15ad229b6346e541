//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - `device_time` is the tracker's own clock as carried in the frame
//! - `received_at` / `enqueued_at` are gateway clocks, used for diagnostics only

mod config;
mod device_id;
mod dictionary;
mod error;
mod message;
mod record;
mod signal;
mod sink;

pub use config::*;
pub use device_id::{DeviceId, DEVICE_ID_LEN};
pub use dictionary::*;
pub use error::*;
pub use message::*;
pub use record::*;
pub use signal::CanSignal;
pub use sink::*;
