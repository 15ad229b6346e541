//! Frame builders shared by the connection and server tests

use bytes::Bytes;
use chrono::DateTime;
use contracts::{DataType, DeviceId, GatewayConfig};
use protocol::payload::encode_legacy_can;
use protocol::{build_frame, compose_data};
use std::net::SocketAddr;

use crate::context::IngestContext;

pub(crate) fn device() -> DeviceId {
    DeviceId::from_raw([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08])
}

pub(crate) fn peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40_000))
}

pub(crate) fn context(config: GatewayConfig) -> IngestContext {
    IngestContext::with_builtin(config)
}

pub(crate) fn frame(data_type: DataType, payload: &[u8]) -> Bytes {
    let time = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
    build_frame(&compose_data(&device(), time, data_type, payload))
}

pub(crate) fn encode_can(can_id: u32, data: &[u8]) -> Bytes {
    frame(DataType::Can, &encode_legacy_can(can_id, data))
}
