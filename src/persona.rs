//! Persona configuration
//!
//! A persona names the assistant and carries the system instruction sent when
//! a session opens. Personas are JSON files with camelCase keys:
//!
//! ```json
//! { "name": "Oracle", "systemInstruction": "Today is {date}. ...", "voice": "Kore" }
//! ```

use std::path::Path;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Placeholder replaced with the current date
pub const DATE_PLACEHOLDER: &str = "{date}";

const DEFAULT_INSTRUCTION: &str = "You are Oracle, a warm and attentive voice companion. \
Listen closely, answer in short spoken sentences and keep a light, playful tone. \
Today is {date}.";

/// Identity of the assistant on the other end of the session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Display name
    pub name: String,

    /// Instruction template; `{date}` is filled in at session start
    pub system_instruction: String,

    /// Preferred prebuilt voice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Oracle".to_string(),
            system_instruction: DEFAULT_INSTRUCTION.to_string(),
            voice: None,
        }
    }
}

impl Persona {
    /// Load a persona from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a valid persona
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let persona = Self::from_json(&content)?;
        tracing::debug!(path = %path.display(), name = %persona.name, "loaded persona");
        Ok(persona)
    }

    /// Parse a persona from JSON text
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or the instruction is empty
    pub fn from_json(json: &str) -> Result<Self> {
        let persona: Self = serde_json::from_str(json)?;
        if persona.system_instruction.trim().is_empty() {
            return Err(Error::Persona(format!(
                "persona {} has an empty system instruction",
                persona.name
            )));
        }
        Ok(persona)
    }

    /// Instruction with the date placeholder filled in
    #[must_use]
    pub fn instruction_for(&self, date: NaiveDate) -> String {
        self.system_instruction
            .replace(DATE_PLACEHOLDER, &date.format("%a %b %d %Y").to_string())
    }

    /// Instruction for today, in local time
    #[must_use]
    pub fn render_instruction(&self) -> String {
        self.instruction_for(Local::now().date_naive())
    }
}
