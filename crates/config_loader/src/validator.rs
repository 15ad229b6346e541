//! Config validation
//!
//! Rules:
//! - derive-level ranges on every section
//! - drop threshold ratio in (0, 1]
//! - max_buffer_size >= max_frame_size
//! - sink names unique and non-empty
//! - brand pack names unique and not a reserved slot
//! - dictionary files well-formed (kind, ranges, signal widths)

use std::collections::HashSet;

use contracts::{ContractError, DictionaryFile, DictionaryKind, GatewayConfig};
use validator::Validate;

/// Validate a GatewayConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &GatewayConfig) -> Result<(), ContractError> {
    validate_derived(config)?;
    validate_backpressure(config)?;
    validate_framing(config)?;
    validate_sinks(config)?;
    validate_brand_packs(config)?;
    Ok(())
}

/// Run the `#[validate]` attribute rules
fn validate_derived(config: &GatewayConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        let field = errors
            .errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "config".to_string());
        ContractError::config_validation(field, errors.to_string())
    })
}

fn validate_backpressure(config: &GatewayConfig) -> Result<(), ContractError> {
    let ratio = config.backpressure.drop_threshold_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(ContractError::config_validation(
            "backpressure.drop_threshold_ratio",
            format!("ratio must be in (0, 1], got {ratio}"),
        ));
    }
    Ok(())
}

fn validate_framing(config: &GatewayConfig) -> Result<(), ContractError> {
    let framing = &config.framing;
    if framing.max_buffer_size < framing.max_frame_size {
        return Err(ContractError::config_validation(
            "framing.max_buffer_size",
            format!(
                "max_buffer_size ({}) must be >= max_frame_size ({})",
                framing.max_buffer_size, framing.max_frame_size
            ),
        ));
    }
    Ok(())
}

fn validate_sinks(config: &GatewayConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in config.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
    }
    Ok(())
}

fn validate_brand_packs(config: &GatewayConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for pack in &config.dictionaries.brand_packs {
        if pack.name == "j1939" || pack.name == "obd2" || pack.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("dictionaries.brand_packs[name={}]", pack.name),
                "brand pack name must be non-empty and not a reserved slot",
            ));
        }
        if !seen.insert(pack.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("dictionaries.brand_packs[name={}]", pack.name),
                "duplicate brand pack name",
            ));
        }
    }
    Ok(())
}

/// Structural checks on a dictionary file
///
/// Formula syntax is checked later, when the decoder compiles the file.
pub fn validate_dictionary(source: &str, dict: &DictionaryFile) -> Result<(), ContractError> {
    match dict.kind {
        DictionaryKind::J1939 | DictionaryKind::Brand => {
            if !dict.pids.is_empty() {
                return Err(ContractError::dictionary_load(
                    source,
                    format!("{} dictionary cannot define pids", dict.kind.as_str()),
                ));
            }
        }
        DictionaryKind::Obd2 => {
            if !dict.messages.is_empty() {
                return Err(ContractError::dictionary_load(
                    source,
                    "obd2 dictionary cannot define messages",
                ));
            }
        }
    }

    if dict.kind == DictionaryKind::Brand && dict.can_id_ranges.is_empty() {
        return Err(ContractError::dictionary_load(
            source,
            "brand pack needs at least one can_id_ranges entry",
        ));
    }

    for [lo, hi] in &dict.can_id_ranges {
        if lo > hi {
            return Err(ContractError::dictionary_load(
                source,
                format!("can_id_ranges entry [{lo:#x}, {hi:#x}] is inverted"),
            ));
        }
    }

    for message in &dict.messages {
        for signal in &message.signals {
            if signal.bit_length == 0 || signal.bit_length > 64 {
                return Err(ContractError::dictionary_load(
                    source,
                    format!(
                        "message {:#x} signal '{}': bit_length must be 1..=64, got {}",
                        message.id, signal.name, signal.bit_length
                    ),
                ));
            }
            if !signal.scale.is_finite() || !signal.offset.is_finite() {
                return Err(ContractError::dictionary_load(
                    source,
                    format!(
                        "message {:#x} signal '{}': scale and offset must be finite",
                        message.id, signal.name
                    ),
                ));
            }
        }
    }

    Ok(())
}
