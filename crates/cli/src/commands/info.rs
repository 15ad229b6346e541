//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use can_decoder::{DecoderContext, BUILTIN_VERSION, J1939_SLOT, OBD2_SLOT};
use contracts::GatewayConfig;

use super::load_config;
use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    server: ServerInfo,
    backpressure: BackpressureInfo,
    tp: TpInfo,
    dictionaries: Vec<DictionaryInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct ServerInfo {
    host: String,
    port: u16,
    read_timeout_ms: u64,
    idle_timeout_ms: u64,
    max_frame_size: usize,
}

#[derive(Serialize)]
struct BackpressureInfo {
    max_queue_size: usize,
    drop_threshold_ratio: f64,
    persist_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate_limit_per_minute: Option<u32>,
}

#[derive(Serialize)]
struct TpInfo {
    timeout_ms: u64,
    max_sessions: usize,
}

#[derive(Serialize)]
struct DictionaryInfo {
    slot: String,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    if let Some(ref path) = args.config {
        info!(config = %path.display(), "Loading configuration info");
    }
    let gateway = load_config(args.config.as_deref())?;

    let decoder = if args.dictionaries {
        Some(
            DecoderContext::from_config(&gateway.dictionaries)
                .context("Failed to load CAN dictionaries")?,
        )
    } else {
        None
    };

    let info = build_config_info(&gateway, decoder.as_ref());
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info, args);
    }

    Ok(())
}

fn build_config_info(gateway: &GatewayConfig, decoder: Option<&DecoderContext>) -> ConfigInfo {
    let version = |slot: &str| decoder.and_then(|d| d.version(slot));
    let source = |path: &Option<std::path::PathBuf>| {
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("built-in ({BUILTIN_VERSION})"))
    };

    let mut dictionaries = vec![
        DictionaryInfo {
            slot: J1939_SLOT.to_string(),
            source: source(&gateway.dictionaries.j1939),
            version: version(J1939_SLOT),
        },
        DictionaryInfo {
            slot: OBD2_SLOT.to_string(),
            source: source(&gateway.dictionaries.obd2),
            version: version(OBD2_SLOT),
        },
    ];
    dictionaries.extend(gateway.dictionaries.brand_packs.iter().map(|pack| DictionaryInfo {
        slot: pack.name.clone(),
        source: pack.path.display().to_string(),
        version: version(&pack.name),
    }));

    ConfigInfo {
        server: ServerInfo {
            host: gateway.server.host.clone(),
            port: gateway.server.port,
            read_timeout_ms: gateway.server.read_timeout_ms,
            idle_timeout_ms: gateway.server.idle_timeout_ms,
            max_frame_size: gateway.framing.max_frame_size,
        },
        backpressure: BackpressureInfo {
            max_queue_size: gateway.backpressure.max_queue_size,
            drop_threshold_ratio: gateway.backpressure.drop_threshold_ratio,
            persist_only: gateway.backpressure.persist_only,
            rate_limit_per_minute: gateway
                .rate_limit
                .enabled
                .then_some(gateway.rate_limit.max_frames_per_minute),
        },
        tp: TpInfo {
            timeout_ms: gateway.tp.timeout_ms,
            max_sessions: gateway.tp.max_sessions,
        },
        dictionaries,
        sinks: gateway
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
            })
            .collect(),
    }
}

fn print_config_info(info: &ConfigInfo, args: &InfoArgs) {
    println!("=== Navtelecom Gateway Configuration ===\n");

    println!("Server");
    println!("   |- Listen: {}:{}", info.server.host, info.server.port);
    println!(
        "   |- Timeouts: read {} ms, idle {} ms",
        info.server.read_timeout_ms, info.server.idle_timeout_ms
    );
    println!("   `- Max frame size: {} bytes", info.server.max_frame_size);

    println!("\nBackpressure");
    println!("   |- Queue size: {}", info.backpressure.max_queue_size);
    println!(
        "   |- Soft limit ratio: {}",
        info.backpressure.drop_threshold_ratio
    );
    match info.backpressure.rate_limit_per_minute {
        Some(limit) => println!("   |- Rate limit: {} frames/min", limit),
        None => println!("   |- Rate limit: disabled"),
    }
    println!("   `- Persist only: {}", info.backpressure.persist_only);

    println!("\nTP Sessions");
    println!("   |- Timeout: {} ms", info.tp.timeout_ms);
    println!("   `- Max sessions: {}", info.tp.max_sessions);

    println!("\nDictionaries ({})", info.dictionaries.len());
    for (i, dict) in info.dictionaries.iter().enumerate() {
        let prefix = if i == info.dictionaries.len() - 1 { "`-" } else { "|-" };
        match dict.version {
            Some(ref version) => {
                println!("   {} {}: {} [{}]", prefix, dict.slot, dict.source, version)
            }
            None => println!("   {} {}: {}", prefix, dict.slot, dict.source),
        }
    }

    if args.sinks && !info.sinks.is_empty() {
        println!("\nSinks ({})", info.sinks.len());
        for (i, sink) in info.sinks.iter().enumerate() {
            let prefix = if i == info.sinks.len() - 1 { "`-" } else { "|-" };
            println!(
                "   {} {} ({}, queue {})",
                prefix, sink.name, sink.sink_type, sink.queue_capacity
            );
        }
    } else if !info.sinks.is_empty() {
        println!("\nSinks: {}", info.sinks.len());
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_report_builtin_dictionaries() {
        let gateway = GatewayConfig::default();
        let decoder = DecoderContext::new();
        let info = build_config_info(&gateway, Some(&decoder));

        assert_eq!(info.server.port, 5221);
        assert_eq!(info.dictionaries.len(), 2);
        assert!(info.dictionaries[0].source.starts_with("built-in"));
        assert_eq!(
            info.dictionaries[0].version.as_deref(),
            Some(BUILTIN_VERSION)
        );
    }

    #[test]
    fn test_versions_omitted_without_decoder() {
        let info = build_config_info(&GatewayConfig::default(), None);
        assert!(info.dictionaries.iter().all(|d| d.version.is_none()));
        let json = serde_json::to_value(&info).unwrap();
        assert!(json["dictionaries"][0].get("version").is_none());
    }
}
