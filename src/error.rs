//! Common error types for the assistant engine

use std::error::Error;
use std::fmt;

/// Unified error type for assistant operations
///
/// Provider failures never appear here: the live-data gateway recovers
/// them to `None` before they can reach a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantError {
    /// No extractor registered for this mime type or extension
    UnsupportedFormat(String),

    /// Microphone permission denied, device missing, or already held
    MicrophoneUnavailable(String),

    /// Recording stopped with an empty transcript
    NoSpeechDetected,

    /// The transcription channel was closed while a send was pending
    ChannelClosed,

    /// An event arrived that the current voice state cannot accept
    InvalidTransition { state: String, event: String },
}

impl fmt::Display for AssistantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssistantError::UnsupportedFormat(msg) => {
                write!(f, "Unsupported format: {}", msg)
            }
            AssistantError::MicrophoneUnavailable(msg) => {
                write!(f, "Microphone unavailable: {}", msg)
            }
            AssistantError::NoSpeechDetected => {
                write!(f, "No speech detected")
            }
            AssistantError::ChannelClosed => {
                write!(f, "Transcription channel closed")
            }
            AssistantError::InvalidTransition { state, event } => {
                write!(f, "Invalid transition: {} cannot accept {}", state, event)
            }
        }
    }
}

impl Error for AssistantError {}
