//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON gateway configuration files
//! - Parse TOML/JSON CAN dictionary files
//! - Validate both before anything downstream sees them
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("gateway.toml")).unwrap();
//! println!("Listening on port {}", config.server.port);
//! ```

mod parser;
mod validator;

pub use contracts::{DictionaryFile, GatewayConfig};
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<GatewayConfig, ContractError> {
        let format = detect_format(path)?;
        let content = read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<GatewayConfig, ContractError> {
        let config: GatewayConfig = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }

    /// Serialize GatewayConfig to TOML string
    pub fn to_toml(config: &GatewayConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize GatewayConfig to JSON string
    pub fn to_json(config: &GatewayConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

/// Dictionary file loader
///
/// Errors are reported as `ContractError::DictionaryLoad` naming the file.
pub struct DictionaryLoader;

impl DictionaryLoader {
    /// Load a dictionary from file path (.toml / .json)
    pub fn load_from_path(path: &Path) -> Result<DictionaryFile, ContractError> {
        let source = path.display().to_string();
        let format = detect_format(path)
            .map_err(|e| ContractError::dictionary_load(&source, e.to_string()))?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ContractError::dictionary_load(&source, e.to_string()))?;
        Self::load_from_str(&source, &content, format)
    }

    /// Load a dictionary from string; `source` names it in errors
    pub fn load_from_str(
        source: &str,
        content: &str,
        format: ConfigFormat,
    ) -> Result<DictionaryFile, ContractError> {
        let dict: DictionaryFile = parser::parse(content, format)
            .map_err(|e| ContractError::dictionary_load(source, e.to_string()))?;
        validator::validate_dictionary(source, &dict)?;
        Ok(dict)
    }

    /// Structural checks on a dictionary built in memory
    pub fn validate(source: &str, dict: &DictionaryFile) -> Result<(), ContractError> {
        validator::validate_dictionary(source, dict)
    }
}

/// Infer configuration format from file extension
fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
    let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
        ContractError::config_parse("cannot determine file format from extension")
    })?;

    ConfigFormat::from_extension(ext)
        .ok_or_else(|| ContractError::config_parse(format!("unsupported config format: .{ext}")))
}

/// Read configuration file content
fn read_file(path: &Path) -> Result<String, ContractError> {
    Ok(std::fs::read_to_string(path)?)
}
