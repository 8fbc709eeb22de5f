//! Negotiator persona
//!
//! The persona is the system instruction that steers the remote model's tone.
//! It can be the built-in console negotiator, a TOML persona file, or a plain
//! text file whose first `# ` heading names it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Name of the built-in persona
pub const DEFAULT_PERSONA_NAME: &str = "Sentinel";

const DEFAULT_INSTRUCTION: &str = "You are Sentinel, the voice of an automated security \
console. Someone has triggered an intrusion alert and is now speaking to you through the \
console microphone. Keep them talking: stay calm, professional and firm. Ask who they are, \
how they got access and what they want. Never reveal credentials, network details or the \
state of the defenses. Do not threaten or insult. Speak in short sentences suited to voice.";

/// Identity and instruction text for the remote model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Display name
    pub name: String,

    /// Free-text system instruction
    pub instruction: String,

    /// Prebuilt voice that suits this persona, if it has a preference
    #[serde(default)]
    pub voice: Option<String>,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: DEFAULT_PERSONA_NAME.to_string(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            voice: None,
        }
    }
}

impl Persona {
    /// Load a persona from disk
    ///
    /// `.toml` files are parsed as a [`Persona`]; anything else is read as the
    /// instruction text itself.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or a TOML persona is invalid
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let persona = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            Self::from_text(&content)
        };

        tracing::info!(path = %path.display(), name = %persona.name, "loaded persona");
        Ok(persona)
    }

    /// Build a persona from plain instruction text
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let mut lines = text.lines();
        let first = lines.next().unwrap_or_default().trim();

        match first.strip_prefix("# ") {
            Some(name) => Self {
                name: name.trim().to_string(),
                instruction: lines.collect::<Vec<_>>().join("\n").trim().to_string(),
                voice: None,
            },
            None => Self {
                name: "Custom".to_string(),
                instruction: text.trim().to_string(),
                voice: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_persona_is_sentinel() {
        let persona = Persona::default();
        assert_eq!(persona.name, DEFAULT_PERSONA_NAME);
        assert!(persona.instruction.contains("security console"));
    }

    #[test]
    fn heading_names_text_persona() {
        let persona = Persona::from_text("# Gatekeeper\n\nBe curt.\nAsk for a badge.\n");
        assert_eq!(persona.name, "Gatekeeper");
        assert_eq!(persona.instruction, "Be curt.\nAsk for a badge.");
    }

    #[test]
    fn plain_text_persona() {
        let persona = Persona::from_text("  Be polite.  ");
        assert_eq!(persona.name, "Custom");
        assert_eq!(persona.instruction, "Be polite.");
    }

    #[test]
    fn loads_toml_persona() {
        let dir = std::env::temp_dir().join(format!("parley-persona-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("warden.toml");
        std::fs::write(
            &path,
            "name = \"Warden\"\ninstruction = \"Hold the line.\"\nvoice = \"Kore\"\n",
        )
        .unwrap();

        let persona = Persona::from_file(&path).unwrap();
        assert_eq!(persona.name, "Warden");
        assert_eq!(persona.voice.as_deref(), Some("Kore"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
