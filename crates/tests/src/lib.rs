//! # Integration Tests
//!
//! Cross-crate and end-to-end tests.
//!
//! Covers:
//! - Contract round trips (configuration)
//! - Protocol, TP and decoder scenarios through the public APIs
//! - Device frames -> ACK -> sink records over real TCP

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::GatewayConfig;

    #[test]
    fn test_default_config_round_trips() {
        let toml = ConfigLoader::to_toml(&GatewayConfig::default()).unwrap();
        let config = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.server.port, 5221);
        assert_eq!(config.framing.max_frame_size, 4096);
        assert_eq!(config.tp.timeout_ms, 500);
        assert_eq!(config.tp.max_sessions, 1000);
        assert_eq!(config.backpressure.max_queue_size, 10_000);
    }
}

#[cfg(test)]
mod scenario_tests {
    use std::net::SocketAddr;

    use can_decoder::DecoderContext;
    use chrono::DateTime;
    use contracts::{DeviceId, FramingConfig, TpConfig};
    use ingestion::DeviceSimulator;
    use protocol::error::ProtocolError;
    use protocol::extractor::FrameExtractor;
    use protocol::{try_parse, FrameStatus};
    use tp_assembly::TpReassembler;

    const TP_CM: u32 = 0x18EC_FF00;
    const TP_DT: u32 = 0x18EB_FF00;

    fn device() -> DeviceId {
        DeviceId::from_raw([0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80])
    }

    #[test]
    fn test_bam_inline_returns_immediately() {
        let tp = TpReassembler::new(&TpConfig::default());
        let bam = [0x20, 0x00, 0x04, 0x01, 0x01, 0x02, 0x03, 0x04];
        let out = tp.process_frame(&device(), TP_CM, &bam);
        assert_eq!(out.as_deref(), Some(&[0x01, 0x02, 0x03, 0x04][..]));
        assert_eq!(tp.session_count(), 0);
    }

    #[test]
    fn test_rts_completes_on_third_frame() {
        let tp = TpReassembler::new(&TpConfig::default());
        let d = device();

        assert!(tp.process_frame(&d, TP_CM, &[0x10, 0x00, 0x0C, 0x05]).is_none());
        assert!(tp.process_frame(&d, TP_DT, &[0x01, 0x05, 1, 2, 3, 4, 5]).is_none());
        assert!(tp.process_frame(&d, TP_DT, &[0x02, 0x05, 6, 7, 8, 9, 10]).is_none());
        let out = tp.process_frame(&d, TP_DT, &[0x03, 0x05, 11, 12]).unwrap();
        assert_eq!(out.len(), 12);
        assert_eq!(&out[..], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(tp.session_count(), 0);

        // reusing sid 5 without a new announce attaches to nothing
        assert!(tp.process_frame(&d, TP_DT, &[0x01, 0x05, 1, 2, 3, 4, 5]).is_none());
        assert_eq!(tp.stats().completed, 1);
    }

    #[test]
    fn test_eec1_engine_speed() {
        let signals = DecoderContext::new().decode(0x0CF0_0400, &[0x00, 0x80], &device());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].name, "EngineRPM");
        assert_eq!(signals[0].value, 4096.0);
        assert_eq!(signals[0].pgn, Some(0xF004));
    }

    #[test]
    fn test_unknown_pgn_decodes_to_nothing() {
        let decoder = DecoderContext::new();
        assert!(decoder.decode(0x18FF_AA00, &[1, 2, 3], &device()).is_empty());
        // same input, same output
        let time = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(
            decoder.decode_at(0x0CF0_0400, &[0x10, 0x27], &device(), time),
            decoder.decode_at(0x0CF0_0400, &[0x10, 0x27], &device(), time)
        );
    }

    #[test]
    fn test_declared_length_beyond_frame() {
        let frame = [0x7E, 0x20, 0x00, 0x01, 0x02, 0x03, 0x7E];
        let err = try_parse(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader { .. }));
    }

    #[test]
    fn test_extraction_independent_of_chunking() {
        let sim = DeviceSimulator::new(device());
        let time = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut stream = vec![0x00, 0x13];
        for step in 0..5 {
            stream.extend_from_slice(&sim.scripted_frame(step, time));
        }

        let source = SocketAddr::from(([127, 0, 0, 1], 5221));
        let config = FramingConfig::default();

        let mut whole = FrameExtractor::new(source, &config);
        let expected: Vec<_> = whole.feed(&stream).into_iter().map(|f| f.bytes).collect();
        assert_eq!(expected.len(), 5);

        for chunk_size in [1, 3, 64] {
            let mut chunked = FrameExtractor::new(source, &config);
            let frames: Vec<_> = stream
                .chunks(chunk_size)
                .flat_map(|chunk| chunked.feed(chunk))
                .map(|f| f.bytes)
                .collect();
            assert_eq!(frames, expected, "chunk size {chunk_size}");
        }

        for bytes in &expected {
            assert!(matches!(try_parse(bytes), Ok(FrameStatus::Complete(_))));
        }
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use can_decoder::DecoderContext;
    use chrono::{DateTime, Utc};
    use contracts::{DeviceId, GatewayConfig, Record, RecordKind, SinkConfig, SinkType};
    use dispatcher::{create_sink_handles, BatchWriterPool, FileSink, WriterSummary};
    use ingestion::simulator::{REPLY_LEN, SCRIPT_LEN};
    use ingestion::{DeviceSimulator, IngestContext, MetricsSnapshot, TcpServer};
    use protocol::{parse_reply, Reply};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::watch;
    use tokio::task::JoinHandle;

    /// Server plus batch writers feeding a file sink in a temp dir
    struct Gateway {
        ctx: IngestContext,
        addr: SocketAddr,
        shutdown: watch::Sender<bool>,
        server: JoinHandle<ingestion::Result<()>>,
        writers: Option<BatchWriterPool>,
        out: tempfile::TempDir,
    }

    impl Gateway {
        async fn start(
            config: GatewayConfig,
            decoder: Arc<DecoderContext>,
            with_sinks: bool,
        ) -> Self {
            let out = tempfile::tempdir().unwrap();
            let mut config = config;
            config.batch.flush_interval_ms = 20;
            config.sinks = vec![SinkConfig {
                name: "archive".to_string(),
                sink_type: SinkType::File,
                queue_capacity: 64,
                params: HashMap::from([(
                    "base_path".to_string(),
                    out.path().display().to_string(),
                )]),
            }];

            let ctx = IngestContext::new(config, decoder);
            let writers = with_sinks.then(|| {
                let sinks = create_sink_handles(&ctx.config.sinks).unwrap();
                BatchWriterPool::spawn(
                    Arc::clone(&ctx.gate),
                    &RecordKind::ALL,
                    sinks,
                    &ctx.config.batch,
                )
            });

            let server = TcpServer::bind_addr("127.0.0.1:0", ctx.clone()).await.unwrap();
            let addr = server.local_addr().unwrap();
            let (shutdown, rx) = watch::channel(false);
            let server = tokio::spawn(server.run(rx));

            Self {
                ctx,
                addr,
                shutdown,
                server,
                writers,
                out,
            }
        }

        async fn stop(mut self) -> (tempfile::TempDir, Option<WriterSummary>, MetricsSnapshot) {
            self.shutdown.send(true).unwrap();
            tokio::time::timeout(Duration::from_secs(5), self.server)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let summary = match self.writers.take() {
                Some(writers) => Some(writers.shutdown().await),
                None => None,
            };
            (self.out, summary, self.ctx.metrics.snapshot())
        }
    }

    fn records(dir: &Path, kind: RecordKind) -> Vec<Record> {
        let path = FileSink::stream_path(dir, kind);
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn builtin() -> Arc<DecoderContext> {
        Arc::new(DecoderContext::new())
    }

    async fn exchange(client: &mut TcpStream, frame: &[u8]) -> Reply {
        client.write_all(frame).await.unwrap();
        let mut reply = [0u8; REPLY_LEN];
        client.read_exact(&mut reply).await.unwrap();
        parse_reply(&reply).unwrap()
    }

    /// Bump the low CRC byte without creating a marker byte
    fn corrupt_crc(frame: &[u8]) -> Vec<u8> {
        let mut bad = frame.to_vec();
        let i = bad.len() - 3;
        bad[i] = match bad[i].wrapping_add(1) {
            0x7E => bad[i].wrapping_add(2),
            b => b,
        };
        bad
    }

    #[tokio::test]
    async fn test_simulated_device_to_file_sink() {
        let gateway = Gateway::start(GatewayConfig::default(), builtin(), true).await;
        let frames = SCRIPT_LEN * 2;

        let report = DeviceSimulator::new(DeviceId::from_raw([7; 8]))
            .run(gateway.addr, frames, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(report.acks, frames);
        assert_eq!(report.nacks, 0);

        let (out, summary, metrics) = gateway.stop().await;
        assert_eq!(metrics.frames_received, frames);
        assert_eq!(metrics.tp_completed, 2);
        assert!(summary.unwrap().batches_flushed > 0);

        assert_eq!(records(out.path(), RecordKind::RawFrames).len(), frames as usize);
        assert_eq!(records(out.path(), RecordKind::Telemetry).len(), 2);
        assert_eq!(records(out.path(), RecordKind::Events).len(), 2);

        let can_raw = records(out.path(), RecordKind::CanRaw);
        let reassembled = can_raw
            .iter()
            .filter(|r| matches!(r, Record::CanRaw(raw) if raw.reassembled))
            .count();
        assert_eq!(reassembled, 2);

        let names: Vec<String> = records(out.path(), RecordKind::CanSignals)
            .into_iter()
            .filter_map(|r| match r {
                Record::CanSignal(signal) => Some(signal.name),
                _ => None,
            })
            .collect();
        assert!(names.iter().any(|n| n == "EngineRPM"));
        assert!(names.iter().any(|n| n == "VehicleSpeed"));
    }

    #[tokio::test]
    async fn test_bad_crc_nacked_connection_survives() {
        let gateway = Gateway::start(GatewayConfig::default(), builtin(), true).await;
        let sim = DeviceSimulator::new(DeviceId::from_raw([3; 8]));
        let good = sim.scripted_frame(0, t0());

        let mut client = TcpStream::connect(gateway.addr).await.unwrap();
        let nack = exchange(&mut client, &corrupt_crc(&good)).await;
        assert!(!nack.positive);
        assert_eq!(nack.code, 0x02);
        assert_eq!(nack.device_hash, 0);

        assert!(exchange(&mut client, &good).await.positive);

        // the hash now comes from the last validated device
        let nack = exchange(&mut client, &corrupt_crc(&good)).await;
        assert!(!nack.positive);
        assert_ne!(nack.device_hash, 0);
        drop(client);

        let (out, _, metrics) = gateway.stop().await;
        assert_eq!(metrics.nacks_sent, 2);
        assert_eq!(metrics.decode_errors, 2);
        assert_eq!(metrics.acks_sent, 1);
        // rejected frames never reach the sinks
        assert_eq!(records(out.path(), RecordKind::RawFrames).len(), 1);
        assert_eq!(records(out.path(), RecordKind::Telemetry).len(), 1);
    }

    #[tokio::test]
    async fn test_dictionary_reload_between_frames() {
        let dict_dir = tempfile::tempdir().unwrap();
        let dict_path = dict_dir.path().join("j1939.toml");
        let write_dict = |version: &str, scale: f64| {
            let mut file = std::fs::File::create(&dict_path).unwrap();
            write!(
                file,
                r#"
kind = "j1939"
version = "{version}"

[[messages]]
id = 0xF004
name = "EEC1"

[[messages.signals]]
spn = 190
name = "EngineRPM"
start_bit = 0
bit_length = 16
scale = {scale}
unit = "rpm"
"#
            )
            .unwrap();
        };
        write_dict("v1", 0.125);

        let mut config = GatewayConfig::default();
        config.dictionaries.j1939 = Some(dict_path.clone());
        let decoder = Arc::new(DecoderContext::from_config(&config.dictionaries).unwrap());
        let gateway = Gateway::start(config.clone(), Arc::clone(&decoder), false).await;

        let sim = DeviceSimulator::new(DeviceId::from_raw([5; 8]));
        let frame = sim.can_block_frame(&[(0x0CF0_0400, vec![0x00, 0x80])], t0());
        let mut client = TcpStream::connect(gateway.addr).await.unwrap();

        assert!(exchange(&mut client, &frame).await.positive);

        write_dict("v2", 0.25);
        let outcomes = decoder.reload_configured(&config.dictionaries);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1.as_deref().unwrap(), "v2");
        assert!(exchange(&mut client, &frame).await.positive);

        // a broken file keeps the active tables
        std::fs::write(&dict_path, "kind = 5").unwrap();
        assert!(decoder.reload_configured(&config.dictionaries)[0].1.is_err());
        assert!(exchange(&mut client, &frame).await.positive);
        drop(client);

        let gate = Arc::clone(&gateway.ctx.gate);
        gateway.stop().await;

        let mut seen = Vec::new();
        while let Some(item) = gate.get(RecordKind::CanSignals, Duration::ZERO).await {
            if let Record::CanSignal(signal) = item.payload {
                seen.push((signal.value, signal.dict_version));
            }
        }
        assert_eq!(
            seen,
            vec![
                (4096.0, "v1".to_string()),
                (8192.0, "v2".to_string()),
                (8192.0, "v2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_overload_keeps_acking() {
        let mut config = GatewayConfig::default();
        config.backpressure.max_queue_size = 4;
        config.backpressure.drop_threshold_ratio = 0.5;
        config.backpressure.high_priority_wait_ms = 5;
        let gateway = Gateway::start(config, builtin(), false).await;

        let sim = DeviceSimulator::new(DeviceId::from_raw([9; 8]));
        let mut client = TcpStream::connect(gateway.addr).await.unwrap();
        for cycle in 0..20 {
            let frame = sim.scripted_frame(cycle * SCRIPT_LEN, t0());
            assert!(exchange(&mut client, &frame).await.positive);
        }
        drop(client);

        let gate = Arc::clone(&gateway.ctx.gate);
        let (_, _, metrics) = gateway.stop().await;
        assert_eq!(metrics.acks_sent, 20);
        assert!(metrics.records_dropped > 0);
        assert!(metrics.persist_only_frames > 0);
        assert!(gate.len(RecordKind::RawFrames) <= 4);
        assert!(gate.len(RecordKind::Telemetry) <= 4);
    }
}
