//! Wire message types for the recognition service
//!
//! Defines the JSON messages exchanged with the live transcription API.
//! Audio itself travels as binary frames and never appears here.

use serde::{Deserialize, Serialize};

/// Control messages sent to the recognition service
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub(crate) enum ClientMessage {
    /// Flush any buffered audio, deliver remaining results, then close
    CloseStream,
    /// Keep the connection alive through stretches of silence
    KeepAlive,
}

/// Messages received from the recognition service
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ServerMessage {
    /// Transcription hypothesis for the utterance in progress
    Results {
        channel: ResultsChannel,
        #[serde(default)]
        is_final: bool,
    },
    /// Stream-level metadata
    Metadata { request_id: Option<String> },
    /// The service detected the start of speech
    SpeechStarted,
    /// The service segmented an utterance boundary
    UtteranceEnd,
    /// Error reported by the service
    Error {
        description: Option<String>,
        message: Option<String>,
    },
    /// Catch-all for other message types
    #[serde(other)]
    Other,
}

/// Result channel containing hypothesis alternatives
#[derive(Debug, Deserialize)]
pub(crate) struct ResultsChannel {
    #[serde(default)]
    pub alternatives: Vec<ResultsAlternative>,
}

/// A single hypothesis alternative
#[derive(Debug, Deserialize)]
pub(crate) struct ResultsAlternative {
    #[serde(default)]
    pub transcript: String,
}

impl ServerMessage {
    /// Extract the transcript hypothesis if this is a results message
    ///
    /// A results message with no alternatives still yields an empty
    /// hypothesis: every result becomes exactly one event downstream,
    /// none are silently dropped.
    pub fn to_transcript(&self) -> Option<(bool, String)> {
        match self {
            ServerMessage::Results { channel, is_final } => {
                let text = channel
                    .alternatives
                    .first()
                    .map(|alt| alt.transcript.clone())
                    .unwrap_or_default();
                Some((*is_final, text))
            }
            _ => None,
        }
    }

    /// Check if this is an error message
    pub fn error_message(&self) -> Option<String> {
        match self {
            ServerMessage::Error {
                description,
                message,
            } => Some(
                description
                    .clone()
                    .or_else(|| message.clone())
                    .unwrap_or_else(|| "unknown service error".to_string()),
            ),
            _ => None,
        }
    }
}
