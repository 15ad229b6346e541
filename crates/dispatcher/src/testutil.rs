//! Record builders shared by unit tests

use contracts::{DeviceId, EventData, EventRecord, Record, RecordBatch, RecordKind};

pub(crate) fn device(n: u8) -> DeviceId {
    DeviceId::from_raw([0, 0, 0, 0, 0, 0, 0, n])
}

pub(crate) fn event(code: u16) -> Record {
    Record::Event(EventRecord {
        device_id: device(1),
        device_time: Default::default(),
        event: EventData {
            code,
            data: Default::default(),
        },
    })
}

pub(crate) fn event_batch(batch_id: u64, records: usize) -> RecordBatch {
    RecordBatch {
        kind: RecordKind::Events,
        batch_id,
        records: (0..records).map(|i| event(i as u16)).collect(),
    }
}
