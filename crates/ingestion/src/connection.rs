//! Per-connection pipeline: framing, fast ACK, then routing to the gate

use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace, warn};

use contracts::{
    CanRawRecord, CanSubFrame, DeviceId, EventRecord, MessagePayload, ParsedMessage, Priority,
    RawFrame, RawFrameRecord, Record, TelemetryRecord,
};
use protocol::{build_ack, build_nack, try_parse, AckStatus, FrameExtractor, FrameStatus, NackCode};
use tp_assembly::is_tp_frame;

use crate::context::IngestContext;
use crate::error::Result;

/// Why a connection task ended without an I/O error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed its side
    Eof,
    /// Nothing arrived within `idle_timeout`
    IdleTimeout,
    /// Server is stopping
    Shutdown,
}

/// Serve one device connection until it closes.
///
/// Errors are socket errors only; protocol errors are answered with a NACK
/// and never end the connection.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    ctx: IngestContext,
    shutdown: watch::Receiver<bool>,
) -> Result<CloseReason>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    Connection::new(stream, peer, ctx).run(shutdown).await
}

struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    ctx: IngestContext,
    extractor: FrameExtractor,
    /// Device id of the last CRC-validated frame; used to address NACKs
    last_device: Option<DeviceId>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: S, peer: SocketAddr, ctx: IngestContext) -> Self {
        let extractor = FrameExtractor::new(peer, &ctx.config.framing);
        Self {
            stream,
            peer,
            ctx,
            extractor,
            last_device: None,
        }
    }

    #[instrument(name = "connection", skip(self, shutdown), fields(peer = %self.peer))]
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<CloseReason> {
        let server = &self.ctx.config.server;
        let idle_timeout = server.idle_timeout();
        let wait = server.read_timeout().min(idle_timeout);
        let mut buf = vec![0u8; server.read_buffer_size.max(1)];
        let mut last_activity = Instant::now();

        loop {
            if *shutdown.borrow() {
                return Ok(CloseReason::Shutdown);
            }

            let read = tokio::select! {
                read = tokio::time::timeout(wait, self.stream.read(&mut buf)) => read,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(CloseReason::Shutdown);
                    }
                    continue;
                }
            };

            let n = match read {
                Err(_) => {
                    if last_activity.elapsed() >= idle_timeout {
                        info!(
                            peer = %self.peer,
                            idle_ms = idle_timeout.as_millis() as u64,
                            "Connection idle, closing"
                        );
                        return Ok(CloseReason::IdleTimeout);
                    }
                    continue;
                }
                Ok(Ok(0)) => return Ok(CloseReason::Eof),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.into()),
            };
            last_activity = Instant::now();

            trace!(peer = %self.peer, bytes = n, "Read chunk");
            for frame in self.extractor.feed(&buf[..n]) {
                self.process_frame(frame).await?;
            }
        }
    }

    async fn process_frame(&mut self, raw: RawFrame) -> Result<()> {
        let started = Instant::now();
        self.ctx.metrics.record_frame_received();
        observability::record_frame_received(raw.bytes.len());

        match try_parse(&raw.bytes) {
            Ok(FrameStatus::Complete(message)) => {
                let ack = build_ack(&message.device_id, message.data_type, AckStatus::Ok);
                self.reply(&ack).await?;

                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.ctx.metrics.record_ack(latency_ms);
                observability::record_ack_sent(true);
                observability::record_ack_latency_ms(latency_ms);
                debug!(
                    peer = %self.peer,
                    device_id = %message.device_id,
                    data_type = ?message.data_type,
                    "ACK sent"
                );

                self.last_device = Some(message.device_id.clone());
                self.route(raw, message).await;
            }
            Ok(FrameStatus::Incomplete) => {
                self.ctx.metrics.record_incomplete();
                debug!(peer = %self.peer, len = raw.bytes.len(), "Incomplete frame dropped");
            }
            Err(e) => {
                let nack = build_nack(self.last_device.as_ref(), NackCode::FormatError);
                self.reply(&nack).await?;

                self.ctx.metrics.record_nack();
                self.ctx.metrics.record_decode_error();
                observability::record_ack_sent(false);
                observability::record_decode_error(e.kind());
                warn!(peer = %self.peer, error = %e, "Protocol error, frame NACKed");
            }
        }
        Ok(())
    }

    /// Write and flush a reply before anything else happens to the frame
    async fn reply(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn route(&self, raw: RawFrame, message: ParsedMessage) {
        let ParsedMessage {
            device_id,
            device_time,
            payload,
            ..
        } = message;

        let raw_record = RawFrameRecord {
            device_id: Some(device_id.clone()),
            source: raw.source,
            received_at: raw.received_at,
            bytes: raw.bytes,
        };
        self.enqueue(Record::RawFrame(raw_record), Priority::High).await;

        if self.ctx.gate.should_persist_only() {
            self.ctx.metrics.record_persist_only();
            if let MessagePayload::Can(frames) = payload {
                for frame in frames {
                    let record = CanRawRecord {
                        device_id: device_id.clone(),
                        frame,
                        reassembled: false,
                    };
                    self.enqueue(Record::CanRaw(record), Priority::High).await;
                }
            }
            return;
        }

        match payload {
            MessagePayload::Gps(fix) => {
                let record = TelemetryRecord {
                    device_id,
                    device_time,
                    fix,
                };
                self.enqueue(Record::Telemetry(record), Priority::Normal).await;
            }
            MessagePayload::Event(event) => {
                let record = EventRecord {
                    device_id,
                    device_time,
                    event,
                };
                self.enqueue(Record::Event(record), Priority::Normal).await;
            }
            MessagePayload::Can(frames) => {
                for frame in frames {
                    self.process_can_frame(&device_id, frame).await;
                }
            }
            MessagePayload::Extended(_) | MessagePayload::Opaque(_) => {
                trace!(device_id = %device_id, "Payload kept as raw frame only");
            }
        }
    }

    async fn process_can_frame(&self, device_id: &DeviceId, mut frame: CanSubFrame) {
        let metrics = &self.ctx.metrics;
        metrics.record_can_frame();

        if !self.ctx.rate_limiter.check(device_id) {
            metrics.record_rate_limited();
            observability::record_rate_limited();
            warn!(
                device_id = %device_id,
                can_id = frame.can_id,
                "Rate limit exceeded, CAN frame dropped"
            );
            return;
        }

        let mut reassembled = false;
        if is_tp_frame(frame.can_id) {
            let Some(assembled) =
                self.ctx
                    .reassembler
                    .process_frame(device_id, frame.can_id, &frame.payload)
            else {
                trace!(device_id = %device_id, can_id = frame.can_id, "TP fragment buffered");
                return;
            };
            metrics.record_tp_completed();
            observability::record_tp_event("completed");
            info!(
                device_id = %device_id,
                can_id = frame.can_id,
                size = assembled.len(),
                "TP transfer assembled"
            );
            frame.payload = assembled;
            reassembled = true;
        }

        let decode = &self.ctx.config.decode;
        let signals = if decode.can_decode_enable {
            self.ctx
                .decoder
                .decode_at(frame.can_id, &frame.payload, device_id, frame.timestamp)
        } else {
            Vec::new()
        };

        if decode.can_raw_enable {
            let record = CanRawRecord {
                device_id: device_id.clone(),
                frame,
                reassembled,
            };
            self.enqueue(Record::CanRaw(record), Priority::Normal).await;
        }

        if !signals.is_empty() {
            metrics.record_signals(signals.len());
            observability::record_signals_decoded(signals.len());
        }
        for signal in signals {
            self.enqueue(Record::CanSignal(signal), Priority::Normal).await;
        }
    }

    async fn enqueue(&self, record: Record, priority: Priority) {
        let stream = record.kind();
        let accepted = self.ctx.gate.put(stream, record, priority).await;
        self.ctx.metrics.record_enqueue(accepted);
        if !accepted {
            observability::record_queue_drop(stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{context, device, encode_can, frame, peer};
    use bytes::Bytes;
    use contracts::{BackpressureConfig, DataType, GatewayConfig, GpsFix, RecordKind};
    use protocol::{build_frame, parse_reply, payload::encode_gps};
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};

    struct Harness {
        client: DuplexStream,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<Result<CloseReason>>,
        ctx: IngestContext,
    }

    impl Harness {
        fn start(ctx: IngestContext) -> Self {
            let (client, server) = duplex(64 * 1024);
            let (shutdown, rx) = watch::channel(false);
            let task = tokio::spawn(handle_connection(server, peer(), ctx.clone(), rx));
            Self {
                client,
                shutdown,
                task,
                ctx,
            }
        }

        async fn send(&mut self, bytes: &[u8]) {
            self.client.write_all(bytes).await.unwrap();
        }

        async fn read_reply(&mut self) -> protocol::Reply {
            let mut buf = [0u8; 10];
            tokio::time::timeout(Duration::from_secs(1), self.client.read_exact(&mut buf))
                .await
                .expect("reply timed out")
                .unwrap();
            parse_reply(&buf).unwrap()
        }

        async fn close(self) -> CloseReason {
            drop(self.client);
            self.task.await.unwrap().unwrap()
        }
    }

    async fn drain(ctx: &IngestContext, stream: RecordKind) -> Vec<Record> {
        let mut out = Vec::new();
        while let Some(item) = ctx.gate.get(stream, Duration::ZERO).await {
            out.push(item.payload);
        }
        out
    }

    #[tokio::test]
    async fn test_gps_frame_acked_and_routed() {
        let mut h = Harness::start(context(GatewayConfig::default()));
        let fix = GpsFix {
            latitude: 55.75,
            longitude: 37.61,
            speed: 60.0,
            course: 90.0,
            altitude: 150,
            satellites: 9,
            ignition: true,
        };
        h.send(&frame(DataType::Gps, &encode_gps(&fix))).await;

        let reply = h.read_reply().await;
        assert!(reply.positive);
        assert_eq!(reply.code, 0x00);

        let ctx = h.ctx.clone();
        assert_eq!(h.close().await, CloseReason::Eof);
        assert_eq!(drain(&ctx, RecordKind::RawFrames).await.len(), 1);
        let telemetry = drain(&ctx, RecordKind::Telemetry).await;
        assert!(matches!(&telemetry[..], [Record::Telemetry(t)] if t.device_id == device()));
        assert_eq!(ctx.metrics.snapshot().acks_sent, 1);
    }

    #[tokio::test]
    async fn test_j1939_frame_decoded() {
        let mut h = Harness::start(context(GatewayConfig::default()));
        h.send(&encode_can(0x0CF0_0400, &[0x00, 0x80])).await;
        assert!(h.read_reply().await.positive);

        let ctx = h.ctx.clone();
        h.close().await;
        let signals = drain(&ctx, RecordKind::CanSignals).await;
        let [Record::CanSignal(signal)] = &signals[..] else {
            panic!("expected one signal, got {signals:?}");
        };
        assert_eq!(signal.name, "EngineRPM");
        assert_eq!(signal.value, 4096.0);
        assert_eq!(drain(&ctx, RecordKind::CanRaw).await.len(), 1);
        assert_eq!(ctx.metrics.snapshot().signals_decoded, 1);
    }

    #[tokio::test]
    async fn test_bad_crc_nacked_with_last_device() {
        let mut h = Harness::start(context(GatewayConfig::default()));

        let mut corrupt = frame(DataType::Event, &[0x01, 0x00]).to_vec();
        let crc_at = corrupt.len() - 3;
        corrupt[crc_at] ^= 0xFF;
        h.send(&corrupt).await;
        let first = h.read_reply().await;
        assert!(!first.positive);
        assert_eq!(first.code, 0x02);
        assert_eq!(first.device_hash, 0);

        h.send(&frame(DataType::Event, &[0x01, 0x00])).await;
        let ack = h.read_reply().await;
        assert!(ack.positive);

        h.send(&corrupt).await;
        let second = h.read_reply().await;
        assert!(!second.positive);
        assert_eq!(second.device_hash, ack.device_hash);

        let ctx = h.ctx.clone();
        h.close().await;
        let snap = ctx.metrics.snapshot();
        assert_eq!(snap.nacks_sent, 2);
        assert_eq!(snap.decode_errors, 2);
        // rejected frames never reach the gate
        assert_eq!(drain(&ctx, RecordKind::RawFrames).await.len(), 1);
    }

    #[tokio::test]
    async fn test_split_chunks_reassembled() {
        let mut h = Harness::start(context(GatewayConfig::default()));
        let bytes = frame(DataType::Event, &[0x05, 0x00, 0xAA]);
        let (head, tail) = bytes.split_at(5);
        h.send(head).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.send(tail).await;
        assert!(h.read_reply().await.positive);

        let ctx = h.ctx.clone();
        h.close().await;
        assert_eq!(drain(&ctx, RecordKind::Events).await.len(), 1);
    }

    #[tokio::test]
    async fn test_tp_fragments_not_decoded_until_complete() {
        let mut h = Harness::start(context(GatewayConfig::default()));
        let tp_cm = 0x1CEC_FF00;
        let tp_dt = 0x1CEB_FF00;

        h.send(&encode_can(tp_cm, &[0x10, 0x00, 0x0C, 0x05])).await;
        h.read_reply().await;
        h.send(&encode_can(tp_dt, &[0x01, 0x05, 1, 2, 3, 4, 5, 6, 7])).await;
        h.read_reply().await;
        h.send(&encode_can(tp_dt, &[0x02, 0x05, 8, 9, 10, 11, 12])).await;
        h.read_reply().await;

        let ctx = h.ctx.clone();
        h.close().await;
        let raw = drain(&ctx, RecordKind::CanRaw).await;
        let [Record::CanRaw(record)] = &raw[..] else {
            panic!("expected only the assembled frame, got {raw:?}");
        };
        assert!(record.reassembled);
        assert_eq!(record.frame.payload, Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]));
        assert_eq!(ctx.metrics.snapshot().tp_completed, 1);
    }

    #[tokio::test]
    async fn test_persist_only_skips_decoding() {
        let ctx = context(GatewayConfig::default());
        ctx.gate.force_persist_only(true);
        let mut h = Harness::start(ctx);
        h.send(&encode_can(0x0CF0_0400, &[0x00, 0x80])).await;
        assert!(h.read_reply().await.positive);

        let ctx = h.ctx.clone();
        h.close().await;
        assert!(drain(&ctx, RecordKind::CanSignals).await.is_empty());
        let raw = drain(&ctx, RecordKind::CanRaw).await;
        assert!(matches!(&raw[..], [Record::CanRaw(r)] if !r.reassembled));
        assert_eq!(ctx.metrics.snapshot().persist_only_frames, 1);
    }

    #[tokio::test]
    async fn test_full_gate_never_fails_connection() {
        let config = GatewayConfig {
            backpressure: BackpressureConfig {
                max_queue_size: 1,
                high_priority_wait_ms: 10,
                ..BackpressureConfig::default()
            },
            ..GatewayConfig::default()
        };
        let mut h = Harness::start(context(config));
        for _ in 0..3 {
            h.send(&frame(DataType::Event, &[0x01, 0x00])).await;
            assert!(h.read_reply().await.positive);
        }

        let ctx = h.ctx.clone();
        assert_eq!(h.close().await, CloseReason::Eof);
        assert!(ctx.metrics.snapshot().records_dropped > 0);
    }

    #[tokio::test]
    async fn test_ack_flushed_while_enqueue_blocked() {
        let config = GatewayConfig {
            backpressure: BackpressureConfig {
                max_queue_size: 1,
                high_priority_wait_ms: 3_000,
                ..BackpressureConfig::default()
            },
            ..GatewayConfig::default()
        };
        let mut h = Harness::start(context(config));

        // fills the single raw_frames slot with a High record
        h.send(&frame(DataType::Event, &[0x01, 0x00])).await;
        assert!(h.read_reply().await.positive);

        // the next raw_frames put waits for space; its ACK must not
        let started = Instant::now();
        h.send(&frame(DataType::Event, &[0x02, 0x00])).await;
        assert!(h.read_reply().await.positive);
        assert!(started.elapsed() < Duration::from_secs(1));

        let snap = h.ctx.metrics.snapshot();
        assert_eq!(snap.acks_sent, 2);
        assert_eq!(snap.records_dropped, 0);
        assert_eq!(h.ctx.gate.len(RecordKind::RawFrames), 1);
        assert!(!h.task.is_finished());

        // freeing the slot lets the blocked put through; the gate is
        // overloaded, so the events themselves are not queued
        let ctx = h.ctx.clone();
        assert!(ctx.gate.get(RecordKind::RawFrames, Duration::ZERO).await.is_some());
        assert_eq!(h.close().await, CloseReason::Eof);
        let snap = ctx.metrics.snapshot();
        assert_eq!(snap.records_dropped, 0);
        assert_eq!(snap.persist_only_frames, 2);
        assert_eq!(ctx.gate.len(RecordKind::RawFrames), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_frames_dropped() {
        let mut config = GatewayConfig::default();
        config.rate_limit.max_frames_per_minute = 1;
        let mut h = Harness::start(context(config));
        for _ in 0..3 {
            h.send(&encode_can(0x0CF0_0400, &[0x00, 0x80])).await;
            assert!(h.read_reply().await.positive);
        }

        let ctx = h.ctx.clone();
        h.close().await;
        assert_eq!(ctx.metrics.snapshot().rate_limited, 2);
        assert_eq!(drain(&ctx, RecordKind::CanSignals).await.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes() {
        let mut config = GatewayConfig::default();
        config.server.read_timeout_ms = 10;
        config.server.idle_timeout_ms = 30;
        let (_client, server) = duplex(1024);
        let (_tx, rx) = watch::channel(false);

        let reason = handle_connection(server, peer(), context(config), rx)
            .await
            .unwrap();
        assert_eq!(reason, CloseReason::IdleTimeout);
    }

    #[tokio::test]
    async fn test_shutdown_signal_closes() {
        let h = Harness::start(context(GatewayConfig::default()));
        h.shutdown.send(true).unwrap();
        let reason = tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn test_garbage_between_frames_ignored() {
        let mut h = Harness::start(context(GatewayConfig::default()));
        let mut bytes = vec![0x00, 0x01, 0x02];
        bytes.extend_from_slice(&build_frame(&protocol::compose_data(
            &device(),
            chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            DataType::Event,
            &[0x07, 0x00],
        )));
        h.send(&bytes).await;
        assert!(h.read_reply().await.positive);
        h.close().await;
    }
}
