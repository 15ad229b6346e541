//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use can_decoder::{DecoderContext, J1939_SLOT, OBD2_SLOT};
use config_loader::{ConfigLoader, DictionaryLoader};
use contracts::{DictionaryFile, DictionaryKind, GatewayConfig};

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<ConfigCheck>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dictionaries: Vec<DictionaryCheck>,
}

#[derive(Serialize)]
struct ConfigCheck {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    listen: String,
    max_queue_size: usize,
    brand_pack_count: usize,
    sink_count: usize,
}

#[derive(Serialize)]
struct DictionaryCheck {
    valid: bool,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    slot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    if args.config.is_none() && args.dictionaries.is_empty() {
        anyhow::bail!("Nothing to validate: pass --config and/or --dictionary");
    }

    let config = args.config.as_deref().map(|path| {
        info!(config = %path.display(), "Validating configuration");
        check_config(path)
    });

    let decoder = DecoderContext::new();
    let dictionaries: Vec<DictionaryCheck> = args
        .dictionaries
        .iter()
        .map(|path| {
            info!(dictionary = %path.display(), "Validating dictionary");
            check_dictionary(&decoder, path)
        })
        .collect();

    let valid = config.as_ref().map_or(true, |c| c.valid) && dictionaries.iter().all(|d| d.valid);
    let result = ValidationResult {
        valid,
        config,
        dictionaries,
    };

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Validation failed")
    }
}

fn check_config(path: &Path) -> ConfigCheck {
    let config_path = path.display().to_string();

    if !path.exists() {
        return ConfigCheck {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", path.display())),
            warnings: Vec::new(),
            summary: None,
        };
    }

    let gateway = match ConfigLoader::load_from_path(path) {
        Ok(gateway) => gateway,
        Err(e) => {
            return ConfigCheck {
                valid: false,
                config_path,
                error: Some(e.to_string()),
                warnings: Vec::new(),
                summary: None,
            }
        }
    };

    // configured dictionary files must compile too
    if let Err(e) = DecoderContext::from_config(&gateway.dictionaries) {
        return ConfigCheck {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: collect_warnings(&gateway),
            summary: None,
        };
    }

    ConfigCheck {
        valid: true,
        config_path,
        error: None,
        warnings: collect_warnings(&gateway),
        summary: Some(ConfigSummary {
            listen: format!("{}:{}", gateway.server.host, gateway.server.port),
            max_queue_size: gateway.backpressure.max_queue_size,
            brand_pack_count: gateway.dictionaries.brand_packs.len(),
            sink_count: gateway.sinks.len(),
        }),
    }
}

fn check_dictionary(decoder: &DecoderContext, path: &Path) -> DictionaryCheck {
    let failed = |error: String, slot: Option<String>| DictionaryCheck {
        valid: false,
        path: path.display().to_string(),
        slot,
        version: None,
        error: Some(error),
    };

    let file = match DictionaryLoader::load_from_path(path) {
        Ok(file) => file,
        Err(e) => return failed(e.to_string(), None),
    };
    let slot = slot_for(&file, path);
    match decoder.validate_dictionary(&slot, &file) {
        Ok(version) => DictionaryCheck {
            valid: true,
            path: path.display().to_string(),
            slot: Some(slot),
            version: Some(version),
            error: None,
        },
        Err(e) => failed(e.to_string(), Some(slot)),
    }
}

/// Slot a standalone dictionary file would be loaded into
fn slot_for(file: &DictionaryFile, path: &Path) -> String {
    match file.kind {
        DictionaryKind::J1939 => J1939_SLOT.to_string(),
        DictionaryKind::Obd2 => OBD2_SLOT.to_string(),
        DictionaryKind::Brand => file
            .brand
            .clone()
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "brand".to_string()),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(gateway: &GatewayConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if gateway.sinks.is_empty() {
        warnings.push("No sinks configured - records will be discarded".to_string());
    }
    if !gateway.decode.can_raw_enable && !gateway.decode.can_decode_enable {
        warnings.push("decode.can_raw_enable and decode.can_decode_enable are both off - CAN data is only kept inside raw frames".to_string());
    }
    if gateway.backpressure.persist_only {
        warnings.push("backpressure.persist_only is set - CAN decoding is skipped".to_string());
    }
    if !gateway.rate_limit.enabled {
        warnings.push("rate_limit is disabled".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if let Some(ref config) = result.config {
        if config.valid {
            println!("✓ Configuration is valid: {}", config.config_path);
            if let Some(ref summary) = config.summary {
                println!("\n  Listen: {}", summary.listen);
                println!("  Queue size: {}", summary.max_queue_size);
                println!("  Brand packs: {}", summary.brand_pack_count);
                println!("  Sinks: {}", summary.sink_count);
            }
        } else {
            println!("✗ Configuration is invalid: {}", config.config_path);
            if let Some(ref error) = config.error {
                println!("\n  Error: {}", error);
            }
        }

        if !config.warnings.is_empty() {
            println!("\n⚠ Warnings:");
            for warning in &config.warnings {
                println!("  - {}", warning);
            }
        }
    }

    for dict in &result.dictionaries {
        if dict.valid {
            println!(
                "✓ Dictionary is valid: {} (slot {}, version {})",
                dict.path,
                dict.slot.as_deref().unwrap_or("-"),
                dict.version.as_deref().unwrap_or("-")
            );
        } else {
            println!("✗ Dictionary is invalid: {}", dict.path);
            if let Some(ref error) = dict.error {
                println!("  Error: {}", error);
            }
        }
    }
}
