//! JSON wire format of the live inference service
//!
//! Server messages are loosely shaped objects where any combination of fields
//! may be present. [`decode_server_message`] flattens them into explicit
//! [`Inbound`] variants at the boundary so nothing downstream inspects raw JSON.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Message sent from client to server
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// First message on a new session
    Setup(Setup),
    /// Streaming microphone audio
    RealtimeInput(RealtimeInput),
}

/// Session configuration
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub input_audio_transcription: AudioTranscriptionConfig,
    pub output_audio_transcription: AudioTranscriptionConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Enables transcription; carries no options
#[derive(Debug, Default, Serialize)]
pub struct AudioTranscriptionConfig {}

/// Realtime media from the client
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Inline binary payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64 data
    pub data: String,
}

/// Multi-part content
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// Single text part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.into()),
                ..Part::default()
            }],
        }
    }
}

/// One content part: text or inline data
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub thought: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<Content>,
    #[serde(default)]
    input_transcription: Option<Transcription>,
    #[serde(default)]
    output_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    #[serde(default)]
    time_left: Option<String>,
}

/// Inbound event from the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Setup acknowledged
    SetupComplete,
    /// Base64 PCM audio fragment
    Audio {
        /// Base64 payload
        data: String,
        /// Media descriptor, e.g. `audio/pcm;rate=24000`
        mime_type: String,
    },
    /// Finalized model text
    Text(String),
    /// Fragment of the transcription of captured speech
    InputTranscript(String),
    /// Fragment of the transcription of the model's speech
    OutputTranscript(String),
    /// Model finished its turn
    TurnComplete,
    /// Model output was cut off by new input
    Interrupted,
    /// Server will close the session soon
    GoAway {
        /// Remaining time as reported by the server
        time_left: Option<String>,
    },
    /// Recognized JSON carrying nothing this client handles
    Unknown,
}

/// Decode one server message into inbound events, in wire order
///
/// # Errors
///
/// Returns `Error::Decode` if the text is not a JSON object
pub fn decode_server_message(text: &str) -> Result<Vec<Inbound>> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::Decode(format!("malformed server message: {e}")))?;

    // serde also accepts a struct written as a sequence, so check the shape first
    if !value.is_object() {
        return Err(Error::Decode(
            "malformed server message: expected a JSON object".to_string(),
        ));
    }

    let message: ServerMessage = serde_json::from_value(value)
        .map_err(|e| Error::Decode(format!("malformed server message: {e}")))?;

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(Inbound::SetupComplete);
    }

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if part.thought {
                    continue;
                }
                if let Some(blob) = part.inline_data {
                    if blob.mime_type.starts_with("audio/") {
                        events.push(Inbound::Audio {
                            data: blob.data,
                            mime_type: blob.mime_type,
                        });
                    }
                }
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    events.push(Inbound::Text(text));
                }
            }
        }

        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            events.push(Inbound::InputTranscript(text));
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            events.push(Inbound::OutputTranscript(text));
        }
        if content.interrupted {
            events.push(Inbound::Interrupted);
        }
        if content.turn_complete {
            events.push(Inbound::TurnComplete);
        }
    }

    if let Some(go_away) = message.go_away {
        events.push(Inbound::GoAway {
            time_left: go_away.time_left,
        });
    }

    if events.is_empty() {
        events.push(Inbound::Unknown);
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_serializes_to_wire_shape() {
        let message = ClientMessage::Setup(Setup {
            model: "models/test".to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: "Charon".to_string(),
                        },
                    },
                },
            },
            system_instruction: Content::text("stay calm"),
            input_audio_transcription: AudioTranscriptionConfig::default(),
            output_audio_transcription: AudioTranscriptionConfig::default(),
        });

        let value = serde_json::to_value(&message).unwrap();
        let setup = &value["setup"];
        assert_eq!(setup["model"], "models/test");
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Charon"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "stay calm");
        assert!(setup["systemInstruction"]["parts"][0].get("thought").is_none());
        assert!(setup["inputAudioTranscription"].is_object());
    }

    #[test]
    fn realtime_input_serializes_to_wire_shape() {
        let message = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: "AAA=".to_string(),
            }],
        });

        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"AAA="}]}}"#
        );
    }

    #[test]
    fn decodes_setup_complete() {
        assert_eq!(
            decode_server_message(r#"{"setupComplete":{}}"#).unwrap(),
            vec![Inbound::SetupComplete]
        );
    }

    #[test]
    fn decodes_audio_and_text_parts_in_order() {
        let json = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}},
            {"text":"We can talk."},
            {"text":"internal reasoning","thought":true}
        ]}}}"#;

        assert_eq!(
            decode_server_message(json).unwrap(),
            vec![
                Inbound::Audio {
                    data: "AAAA".to_string(),
                    mime_type: "audio/pcm;rate=24000".to_string(),
                },
                Inbound::Text("We can talk.".to_string()),
            ]
        );
    }

    #[test]
    fn decodes_transcripts_and_turn_markers() {
        let json = r#"{"serverContent":{
            "inputTranscription":{"text":"let me in"},
            "outputTranscription":{"text":"not yet"},
            "turnComplete":true
        }}"#;

        assert_eq!(
            decode_server_message(json).unwrap(),
            vec![
                Inbound::InputTranscript("let me in".to_string()),
                Inbound::OutputTranscript("not yet".to_string()),
                Inbound::TurnComplete,
            ]
        );

        assert_eq!(
            decode_server_message(r#"{"serverContent":{"interrupted":true}}"#).unwrap(),
            vec![Inbound::Interrupted]
        );
    }

    #[test]
    fn decodes_go_away() {
        assert_eq!(
            decode_server_message(r#"{"goAway":{"timeLeft":"10s"}}"#).unwrap(),
            vec![Inbound::GoAway {
                time_left: Some("10s".to_string())
            }]
        );
    }

    #[test]
    fn unrecognized_shapes_are_unknown() {
        assert_eq!(
            decode_server_message(r#"{"usageMetadata":{"totalTokenCount":12}}"#).unwrap(),
            vec![Inbound::Unknown]
        );
        assert_eq!(
            decode_server_message(r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"image/png","data":"x"}}]}}}"#)
                .unwrap(),
            vec![Inbound::Unknown]
        );
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            decode_server_message("not json"),
            Err(Error::Decode(_))
        ));
        assert!(matches!(decode_server_message("[1,2]"), Err(Error::Decode(_))));
    }

    #[test]
    fn rejects_non_object_json() {
        for text in ["[{}]", "[]", "[null, null]", "42", "\"text\"", "null"] {
            assert!(
                matches!(decode_server_message(text), Err(Error::Decode(_))),
                "accepted {text}"
            );
        }
    }
}
