//! Config parsing
//!
//! TOML (preferred) and JSON.

use contracts::ContractError;
use serde::de::DeserializeOwned;

/// Config file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (recommended)
    Toml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Infer format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse TOML content
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse JSON content
pub fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse by format
pub fn parse<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> Result<T, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DictionaryFile, DictionaryKind, GatewayConfig};

    #[test]
    fn test_parse_toml_partial_sections() {
        let content = r#"
[server]
port = 6000

[tp]
timeout_ms = 750
"#;
        let config: GatewayConfig = parse_toml(content).unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.tp.timeout_ms, 750);
        assert_eq!(config.tp.max_sessions, 1000);
    }

    #[test]
    fn test_parse_json_dictionary() {
        let content = r#"{
            "kind": "obd2",
            "version": "1.0",
            "pids": [{ "pid": 13, "name": "VehicleSpeed", "formula": "A", "unit": "km/h" }]
        }"#;
        let dict: DictionaryFile = parse_json(content).unwrap();
        assert_eq!(dict.kind, DictionaryKind::Obd2);
        assert_eq!(dict.pids.len(), 1);
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let result: Result<GatewayConfig, _> = parse_toml("invalid toml [[[");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
