//! TOML configuration file loading
//!
//! Supports `~/.config/oracle/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct OracleConfigFile {
    /// Live session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Persona selection
    #[serde(default)]
    pub persona: PersonaFileConfig,

    /// Audio configuration
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Live session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// API key for the live endpoint
    pub api_key: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-12-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Kore")
    pub voice: Option<String>,

    /// Websocket endpoint override
    pub endpoint: Option<String>,
}

/// Persona configuration
#[derive(Debug, Default, Deserialize)]
pub struct PersonaFileConfig {
    /// Path to a persona JSON file
    pub path: Option<PathBuf>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Samples per outbound capture frame
    pub frame_size: Option<usize>,
}

/// Load the TOML config file from the standard path
///
/// Returns `OracleConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> OracleConfigFile {
    let Some(path) = config_file_path() else {
        return OracleConfigFile::default();
    };

    if !path.exists() {
        return OracleConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            OracleConfigFile::default()
        }
    }
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<OracleConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/oracle/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("oracle").join("config.toml"))
}
