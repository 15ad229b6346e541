//! `decode` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;

use can_decoder::DecoderContext;
use contracts::{CanSignal, MessagePayload, ParsedMessage, TpConfig};
use protocol::{try_parse, FrameStatus};
use tp_assembly::{is_tp_frame, TpReassembler};

use super::load_config;
use crate::cli::DecodeArgs;

#[derive(Serialize)]
struct DecodeOutput {
    message: ParsedMessage,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tp_transfers: Vec<TpTransfer>,
    signals: Vec<CanSignal>,
}

#[derive(Serialize)]
struct TpTransfer {
    can_id: u32,
    data: String,
}

/// Execute the `decode` command
pub fn run_decode(args: &DecodeArgs) -> Result<()> {
    let frame = parse_hex(&args.frame)?;
    let config = load_config(args.config.as_deref())?;
    let decoder = if args.config.is_some() {
        DecoderContext::from_config(&config.dictionaries)
            .context("Failed to load CAN dictionaries")?
    } else {
        DecoderContext::new()
    };

    let output = decode_frame(&frame, &decoder, &config.tp)?;

    if args.json {
        let json =
            serde_json::to_string_pretty(&output).context("Failed to serialize decode result")?;
        println!("{}", json);
    } else {
        print_decode_output(&output);
    }
    Ok(())
}

/// Hex string to bytes; whitespace and a leading `0x` are ignored
fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input.split_whitespace().collect();
    let cleaned = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(&cleaned);
    hex::decode(cleaned).context("Frame is not valid hex")
}

fn decode_frame(frame: &[u8], decoder: &DecoderContext, tp: &TpConfig) -> Result<DecodeOutput> {
    let message = match try_parse(frame).context("Frame rejected")? {
        FrameStatus::Complete(message) => message,
        FrameStatus::Incomplete => anyhow::bail!("Frame is incomplete ({} bytes)", frame.len()),
    };

    let reassembler = TpReassembler::new(tp);
    let mut tp_transfers = Vec::new();
    let mut signals = Vec::new();

    if let MessagePayload::Can(ref frames) = message.payload {
        for sub in frames {
            let payload = if is_tp_frame(sub.can_id) {
                match reassembler.process_frame(&message.device_id, sub.can_id, &sub.payload) {
                    Some(data) => {
                        tp_transfers.push(TpTransfer {
                            can_id: sub.can_id,
                            data: hex::encode(&data),
                        });
                        data
                    }
                    None => continue,
                }
            } else {
                sub.payload.clone()
            };
            signals.extend(decoder.decode_at(
                sub.can_id,
                &payload,
                &message.device_id,
                sub.timestamp,
            ));
        }
    }

    Ok(DecodeOutput {
        message,
        tp_transfers,
        signals,
    })
}

fn print_decode_output(output: &DecodeOutput) {
    let message = &output.message;
    println!("Device: {}", message.device_id);
    println!("Device time: {}", message.device_time);
    println!("Data type: {:?}", message.data_type);

    match &message.payload {
        MessagePayload::Gps(fix) => {
            println!(
                "GPS: {:.6}, {:.6} speed {:.1} km/h course {:.1} alt {} m, {} satellites, ignition {}",
                fix.latitude,
                fix.longitude,
                fix.speed,
                fix.course,
                fix.altitude,
                fix.satellites,
                if fix.ignition { "on" } else { "off" }
            );
        }
        MessagePayload::Event(event) => {
            println!("Event: code {:#06x}, {} data bytes", event.code, event.data.len());
        }
        MessagePayload::Can(frames) => {
            println!("CAN frames ({}):", frames.len());
            for sub in frames {
                println!(
                    "  - {:#010x} [{}] {}",
                    sub.can_id,
                    sub.dlc,
                    hex::encode(&sub.payload)
                );
            }
        }
        MessagePayload::Extended(ext) => {
            println!("Extended: type {:#06x}, {} bytes", ext.ext_type, ext.data.len());
        }
        MessagePayload::Opaque(data) => {
            println!("Opaque payload: {}", hex::encode(data));
        }
    }

    for transfer in &output.tp_transfers {
        println!("TP transfer on {:#010x}: {}", transfer.can_id, transfer.data);
    }

    if output.signals.is_empty() {
        if matches!(message.payload, MessagePayload::Can(_)) {
            println!("No known signals");
        }
    } else {
        println!("Signals ({}):", output.signals.len());
        for signal in &output.signals {
            println!(
                "  - {} = {} {} ({})",
                signal.name, signal.value, signal.unit, signal.dict_version
            );
        }
    }
}
