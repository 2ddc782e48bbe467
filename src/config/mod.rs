//! Configuration management for Oracle
//!
//! Values resolve in order: environment, then the TOML file, then defaults.
//! Command-line flags are applied on top by the binary.

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;

use crate::bridge::{BridgeOptions, CAPTURE_FRAME_SIZE};
use crate::session::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_VOICE};
use crate::{Error, Persona, Result};

pub use file::{OracleConfigFile, config_file_path, load_config_file};

/// Environment variables checked for the API key, in order
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "ORACLE_API_KEY"];

/// Oracle configuration
#[derive(Debug)]
pub struct Config {
    /// API key for the live endpoint
    pub api_key: SecretString,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// Websocket endpoint
    pub endpoint: String,

    /// Active persona
    pub persona: Persona,

    /// Where the persona came from, if not built in
    pub persona_path: Option<PathBuf>,

    /// Samples per outbound capture frame
    pub frame_size: usize,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured or the persona cannot be loaded
    pub fn load() -> Result<Self> {
        Self::resolve(load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured, the frame size is zero or
    /// the persona cannot be loaded
    pub fn resolve(fc: OracleConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = API_KEY_VARS
            .iter()
            .find_map(|&key| env(key))
            .or(fc.session.api_key)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "no API key: set {} or [session] api_key in the config file",
                    API_KEY_VARS[0]
                ))
            })?;

        let persona_path = env("ORACLE_PERSONA").map(PathBuf::from).or(fc.persona.path);
        let persona = match &persona_path {
            Some(path) => Persona::load(path)?,
            None => Persona::default(),
        };

        let voice = env("ORACLE_VOICE")
            .or(fc.session.voice)
            .or_else(|| persona.voice.clone())
            .unwrap_or_else(|| DEFAULT_VOICE.to_string());

        let frame_size = fc.audio.frame_size.unwrap_or(CAPTURE_FRAME_SIZE);
        if frame_size == 0 {
            return Err(Error::Config("audio frame_size must be non-zero".to_string()));
        }

        Ok(Self {
            api_key: SecretString::from(api_key),
            model: env("ORACLE_MODEL")
                .or(fc.session.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice,
            endpoint: env("ORACLE_ENDPOINT")
                .or(fc.session.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            persona,
            persona_path,
            frame_size,
        })
    }

    /// Session parameters for the bridge
    #[must_use]
    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            model: self.model.clone(),
            voice_name: self.voice.clone(),
            persona: self.persona.clone(),
            frame_size: self.frame_size,
        }
    }
}
