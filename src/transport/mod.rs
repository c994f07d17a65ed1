//! Streaming transcription transport
//!
//! Owns the single live WebSocket connection to the recognition service:
//! audio chunks go out, lifecycle and transcript events come back. Every
//! failure is terminal for the connection - there is no reconnection, the
//! session controller decides whether to start over.

mod connection;
mod error;
mod messages;

pub use connection::LiveConnection;
pub use error::TransportError;

use crate::settings::DictationSettings;

/// A single transcript message from the recognition service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    /// Full current hypothesis for the utterance in progress, not a delta.
    /// Consecutive non-final hypotheses supersede each other.
    pub text: String,
    /// True when this hypothesis will not be revised further
    pub is_final: bool,
}

/// Lifecycle and result events emitted by a live connection
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The connection handshake completed
    Opened,
    /// A transcript hypothesis arrived
    Transcript(TranscriptEvent),
    /// The connection failed and is no longer usable
    Error { message: String },
    /// The connection closed
    Closed,
}

/// Recognition options, passed through to the service verbatim
///
/// Unsupported combinations are the remote service's concern, not ours.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub model: String,
    pub language: String,
    pub smart_format: bool,
    pub punctuation: bool,
    pub paragraphs: bool,
    pub utterances: bool,
    pub filler_words: bool,
    pub summarize: bool,
    pub topic_detection: bool,
    pub intent_detection: bool,
    pub sentiment: bool,
}

impl From<&DictationSettings> for StreamOptions {
    fn from(settings: &DictationSettings) -> Self {
        Self {
            model: settings.model.clone(),
            language: settings.language.clone(),
            smart_format: settings.smart_format,
            punctuation: settings.punctuation,
            paragraphs: settings.paragraphs,
            utterances: settings.utterances,
            filler_words: settings.filler_words,
            summarize: settings.summarize,
            topic_detection: settings.topic_detection,
            intent_detection: settings.intent_detection,
            sentiment: settings.sentiment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_settings() {
        let settings = DictationSettings {
            model: "nova-3".to_string(),
            filler_words: true,
            ..DictationSettings::default()
        };

        let options = StreamOptions::from(&settings);
        assert_eq!(options.model, "nova-3");
        assert!(options.filler_words);
        assert!(!options.smart_format);
    }
}
