pub mod audio_capture;
pub mod composer;
pub mod config;
pub mod conversation;
pub mod document_store;
pub mod error;
pub mod extractor;
pub mod live_data;
pub mod scorer;
pub mod transcription_channel;
pub mod voice_session;

// Re-export key components for easier access
pub use audio_capture::{CaptureBackend, CpalCapture, MicHandle, Microphone};
pub use composer::{compose, Composition, ResponseKind, ResponseMetadata};
pub use config::{read_app_config, AppConfig};
pub use conversation::{ConversationEngine, InputOrigin, Message, MessageKind, Role};
pub use document_store::{Chunk, Document, DocumentStore};
pub use error::AssistantError;
pub use live_data::{LiveDataGateway, LiveDataSet, QueryIntent};
pub use scorer::{LexicalScorer, SearchResult};
pub use transcription_channel::{ChannelEvent, ChannelTransport, TranscriptionChannel};
pub use voice_session::{VoiceController, VoiceSession, VoiceState};
