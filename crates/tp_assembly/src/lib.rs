//! # TP Assembly
//!
//! J1939 Transport Protocol reassembly of multi-packet CAN transfers.
//!
//! One `TpReassembler` is shared by every connection. Sessions are keyed by
//! device, not connection, so a transfer may span a reconnect; abandoned
//! sessions are reaped by timeout.

mod frame;
mod reassembler;
mod session;

pub use frame::{is_tp_frame, TpControl, TpFrame, TP_DATA_BYTES};
pub use reassembler::{TpReassembler, TpStats};
pub use session::{SessionKey, TpKind, TpState};
