// FILE: src/cli/config.rs

use crate::error::{CrushError, Result};
use crate::types::Options;
use std::fs;
use std::path::Path;

/// Load compiler options from a `.toml` or `.json` file. Missing keys
/// keep their defaults.
pub fn load(config_path: &str) -> Result<Options> {
    let config_content = fs::read_to_string(config_path).map_err(|e| CrushError::FileNotFound {
        path: format!("Config file {}: {}", config_path, e),
    })?;
    let options = parse(Path::new(config_path), &config_content)?;
    log::info!("Loaded configuration from {}", config_path);
    Ok(options)
}

pub fn parse(path: &Path, content: &str) -> Result<Options> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(content).map_err(|e| CrushError::InvalidFormat {
            message: format!("Invalid JSON config: {}", e),
        }),
        Some("toml") => toml::from_str(content).map_err(|e| CrushError::InvalidFormat {
            message: format!("Invalid TOML config: {}", e),
        }),
        _ => Err(CrushError::InvalidFormat {
            message: "Config file must be .json or .toml format".to_string(),
        }),
    }
}
