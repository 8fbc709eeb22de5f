//! Configuration management for the negotiation channel
//!
//! Precedence: environment > TOML file > defaults. A persona file named on the
//! command line replaces the configured one, and its voice then ranks like a
//! persona voice from any other source. `--voice` and `--model` are applied on
//! top by the binary.

pub mod file;

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::transport::SessionSetup;
use crate::voice::FRAME_SIZE;
use crate::{Error, Persona, Result};

use self::file::ParleyConfigFile;

/// Default live session endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model for native-audio sessions
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Charon";

/// Negotiation channel configuration
#[derive(Debug)]
pub struct Config {
    /// Credential for the remote service (`PARLEY_API_KEY` or `GEMINI_API_KEY`)
    pub api_key: Option<SecretString>,

    /// WebSocket endpoint
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// Active persona
    pub persona: Persona,

    /// Samples per capture frame
    pub frame_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            persona: Persona::default(),
            frame_size: FRAME_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if a configured persona file cannot be loaded or a value is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(None)
    }

    /// Load configuration, taking the persona from `persona_file` when given
    ///
    /// # Errors
    ///
    /// Returns error if the persona file cannot be loaded or a value is invalid
    pub fn load_with_options(persona_file: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(&fc, persona_file, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file, an optional persona override and
    /// an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the persona file cannot be loaded or a value is invalid
    pub fn from_sources(
        fc: &ParleyConfigFile,
        persona_file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let api_key = env("PARLEY_API_KEY")
            .or_else(|| env("GEMINI_API_KEY"))
            .or_else(|| fc.api_key.clone())
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);

        // Persona (CLI > env > toml > built-in)
        let persona_path = persona_file.map(Path::to_path_buf).or_else(|| {
            env("PARLEY_PERSONA_FILE")
                .or_else(|| fc.persona_file.clone())
                .map(|path| expand_home(&path))
        });
        let persona = match persona_path {
            Some(path) => Persona::from_file(&path)?,
            None => Persona::default(),
        };

        // Voice (env > toml > persona > default)

        let voice = env("PARLEY_VOICE")
            .or_else(|| fc.session.voice.clone())
            .or_else(|| persona.voice.clone())
            .unwrap_or(defaults.voice);

        let frame_size = match env("PARLEY_FRAME_SIZE") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|e| Error::Config(format!("invalid PARLEY_FRAME_SIZE: {e}")))?,
            None => fc.audio.frame_size.unwrap_or(defaults.frame_size),
        };

        let config = Self {
            api_key,
            endpoint: env("PARLEY_ENDPOINT")
                .or_else(|| fc.session.endpoint.clone())
                .unwrap_or(defaults.endpoint),
            model: env("PARLEY_MODEL")
                .or_else(|| fc.session.model.clone())
                .unwrap_or(defaults.model),
            voice,
            persona,
            frame_size,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values that would only fail later, deep inside a session
    ///
    /// A missing credential is not an error here; `connect()` reports it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on an unusable value
    pub fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            return Err(Error::Config("frame size must be positive".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config("endpoint must not be empty".to_string()));
        }
        if self.voice.trim().is_empty() {
            return Err(Error::Config("voice must not be empty".to_string()));
        }
        Ok(())
    }

    /// Credential, if one is present and non-blank
    #[must_use]
    pub fn credential(&self) -> Option<&SecretString> {
        self.api_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
    }

    /// Session parameters for the transport
    #[must_use]
    pub fn session_setup(&self) -> SessionSetup {
        SessionSetup {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            voice: self.voice.clone(),
            instruction: self.persona.instruction.clone(),
        }
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
