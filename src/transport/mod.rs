//! Duplex session with the remote conversational service
//!
//! A [`Session`] is the actor-facing half of one open connection: a push-only
//! outbound queue and an ordered stream of [`SessionEvent`]s. Connectors own the
//! other half ([`SessionPeer`]) and bridge it to the network.

mod live;
pub mod wire;

pub use live::LiveConnector;
pub use wire::{Inbound, decode_server_message};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::voice::EncodedChunk;
use crate::{Error, Result};

/// What the remote service is asked to be for this session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    /// WebSocket endpoint, without credentials
    pub endpoint: String,
    /// Model identifier, e.g. `models/gemini-2.5-flash-native-audio-preview-09-2025`
    pub model: String,
    /// Prebuilt voice name
    pub voice: String,
    /// Persona instruction text
    pub instruction: String,
}

impl SessionSetup {
    /// First wire message for a new session
    #[must_use]
    pub fn to_wire(&self) -> wire::ClientMessage {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        wire::ClientMessage::Setup(wire::Setup {
            model,
            generation_config: wire::GenerationConfig {
                response_modalities: vec![wire::Modality::Audio],
                speech_config: wire::SpeechConfig {
                    voice_config: wire::VoiceConfig {
                        prebuilt_voice_config: wire::PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: wire::Content::text(self.instruction.clone()),
            input_audio_transcription: wire::AudioTranscriptionConfig::default(),
            output_audio_transcription: wire::AudioTranscriptionConfig::default(),
        })
    }
}

/// Frame queued for the remote service
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// One captured audio chunk
    Audio(EncodedChunk),
    /// Close the connection
    Close,
}

impl Outbound {
    /// Wire message for this frame, `None` for control frames
    #[must_use]
    pub fn to_wire(&self) -> Option<wire::ClientMessage> {
        match self {
            Self::Audio(chunk) => Some(wire::ClientMessage::RealtimeInput(wire::RealtimeInput {
                media_chunks: vec![wire::Blob {
                    mime_type: chunk.mime_type.clone(),
                    data: chunk.data.clone(),
                }],
            })),
            Self::Close => None,
        }
    }
}

/// Event delivered from an open session, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Decoded server message
    Inbound(Vec<Inbound>),
    /// Server message that failed to decode
    Malformed(String),
    /// Connection failed
    Error(String),
    /// Connection closed by the remote side
    Closed {
        /// Close reason sent by the server, if any
        reason: Option<String>,
    },
}

/// Actor-side handle of one open duplex session
#[derive(Debug)]
pub struct Session {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    open: bool,
}

/// Connector-side half of a [`Session`]
#[derive(Debug)]
pub struct SessionPeer {
    /// Frames the actor wants sent, in capture order
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    /// Events for the actor
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Create a linked session and peer
    #[must_use]
    pub fn pair() -> (Self, SessionPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        (
            Self {
                outbound: outbound_tx,
                events: events_rx,
                open: true,
            },
            SessionPeer {
                outbound: outbound_rx,
                events: events_tx,
            },
        )
    }

    /// Queue one audio chunk
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the session is closed
    pub fn send_audio(&self, chunk: EncodedChunk) -> Result<()> {
        if !self.open {
            return Err(Error::Transport("session is closed".to_string()));
        }

        self.outbound
            .send(Outbound::Audio(chunk))
            .map_err(|_| Error::Transport("session writer has stopped".to_string()))
    }

    /// Ask the connector to close the connection; further sends are rejected
    pub fn close(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    /// Whether the session still accepts sends
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Next event; `None` once the connector has gone away
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens sessions with the remote service
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one session configured with `setup`
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the connection cannot be established
    async fn open(&self, credential: &SecretString, setup: &SessionSetup) -> Result<Session>;
}
