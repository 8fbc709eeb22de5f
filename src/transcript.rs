//! Append-only conversation log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who said it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Speaker {
    /// The negotiating model
    Ai,
    /// The person at the microphone
    Intruder,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ai => write!(f, "AI"),
            Self::Intruder => write!(f, "INTRUDER"),
        }
    }
}

/// One utterance in the negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
    pub text: String,
}

/// Callback receiving each entry as it is appended
pub type EntryCallback = Box<dyn FnMut(&ConversationEntry) + Send>;

/// Ordered log of utterances
///
/// Entries are never edited or removed. Transcription fragments are buffered
/// per speaker until the turn ends, then appended as a single entry.
#[derive(Default)]
pub struct Transcript {
    entries: Vec<ConversationEntry>,
    pending_ai: String,
    pending_intruder: String,
    callback: Option<EntryCallback>,
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript")
            .field("entries", &self.entries.len())
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

impl Transcript {
    /// Create an empty transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback notified on every appended entry
    pub fn on_entry(&mut self, callback: EntryCallback) {
        self.callback = Some(callback);
    }

    /// Append a finalized utterance; blank text is ignored
    pub fn append(&mut self, speaker: Speaker, text: &str) -> Option<&ConversationEntry> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let entry = ConversationEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            speaker,
            text: text.to_string(),
        };

        tracing::debug!(speaker = %speaker, chars = entry.text.len(), "transcript entry");

        if let Some(callback) = self.callback.as_mut() {
            callback(&entry);
        }

        self.entries.push(entry);
        self.entries.last()
    }

    /// Buffer a transcription fragment until the turn ends
    pub fn push_fragment(&mut self, speaker: Speaker, fragment: &str) {
        match speaker {
            Speaker::Ai => self.pending_ai.push_str(fragment),
            Speaker::Intruder => self.pending_intruder.push_str(fragment),
        }
    }

    /// Append buffered fragments, intruder first, and clear the buffers
    pub fn flush(&mut self) {
        let intruder = std::mem::take(&mut self.pending_intruder);
        let ai = std::mem::take(&mut self.pending_ai);
        self.append(Speaker::Intruder, &intruder);
        self.append(Speaker::Ai, &ai);
    }

    /// All entries in arrival order
    #[must_use]
    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn appends_in_arrival_order() {
        let mut transcript = Transcript::new();
        transcript.append(Speaker::Intruder, "open the door");
        transcript.append(Speaker::Ai, "state your business");

        let speakers: Vec<_> = transcript.entries().iter().map(|e| e.speaker).collect();
        assert_eq!(speakers, vec![Speaker::Intruder, Speaker::Ai]);
        assert_ne!(transcript.entries()[0].id, transcript.entries()[1].id);
        assert!(transcript.entries()[0].timestamp <= transcript.entries()[1].timestamp);
    }

    #[test]
    fn ignores_blank_text() {
        let mut transcript = Transcript::new();
        assert!(transcript.append(Speaker::Ai, "   ").is_none());
        assert!(transcript.is_empty());
    }

    #[test]
    fn fragments_flush_as_one_entry_per_speaker() {
        let mut transcript = Transcript::new();
        transcript.push_fragment(Speaker::Ai, "Access ");
        transcript.push_fragment(Speaker::Intruder, "I just ");
        transcript.push_fragment(Speaker::Ai, "denied.");
        transcript.push_fragment(Speaker::Intruder, "need a file");
        transcript.flush();

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries()[0].speaker, Speaker::Intruder);
        assert_eq!(transcript.entries()[0].text, "I just need a file");
        assert_eq!(transcript.entries()[1].text, "Access denied.");

        transcript.flush();
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn callback_sees_every_entry() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut transcript = Transcript::new();
        transcript.on_entry(Box::new(move |entry| {
            sink.lock().unwrap().push(entry.text.clone());
        }));
        transcript.append(Speaker::Ai, "one");
        transcript.append(Speaker::Ai, "two");

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn speaker_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Speaker::Ai).unwrap(), r#""AI""#);
        assert_eq!(
            serde_json::to_string(&Speaker::Intruder).unwrap(),
            r#""INTRUDER""#
        );
        assert_eq!(Speaker::Intruder.to_string(), "INTRUDER");
    }
}
