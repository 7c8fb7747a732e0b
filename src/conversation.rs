//! Conversation turn engine
//!
//! Binds the retrieval pipeline together: typed or voice-final input goes
//! through lexical search, conditional live-data fetches, and composition,
//! producing an append-only message log for the session. The log lives
//! only as long as the engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::composer::{self, ResponseMetadata};
use crate::config::AppConfig;
use crate::document_store::{Document, DocumentStore};
use crate::error::AssistantError;
use crate::live_data::{LiveDataGateway, LiveDataSet, QueryIntent};
use crate::scorer::LexicalScorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Text,
    Voice,
    Document,
    Hybrid,
    DataInsight,
}

/// One entry in the append-only conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

/// Where a user turn came from; finalized transcripts reuse the text path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOrigin {
    Typed,
    Voice,
}

struct EngineState {
    store: DocumentStore,
    messages: Vec<Message>,
    next_message_id: u64,
}

impl EngineState {
    fn push(&mut self, content: String, role: Role, kind: MessageKind, metadata: Option<ResponseMetadata>) -> Message {
        self.next_message_id += 1;
        let message = Message {
            id: format!("msg_{}", self.next_message_id),
            content,
            role,
            timestamp: Utc::now(),
            kind,
            metadata,
        };
        self.messages.push(message.clone());
        message
    }
}

pub struct ConversationEngine {
    state: Mutex<EngineState>,
    scorer: LexicalScorer,
    gateway: LiveDataGateway,
    overview_chars: usize,
    turn_seq: AtomicU64,
}

impl ConversationEngine {
    pub fn new(config: &AppConfig, gateway: LiveDataGateway) -> Self {
        Self {
            state: Mutex::new(EngineState {
                store: DocumentStore::new(&config.retrieval),
                messages: Vec::new(),
                next_message_id: 0,
            }),
            scorer: LexicalScorer::new(&config.retrieval),
            gateway,
            overview_chars: config.retrieval.overview_chars,
            turn_seq: AtomicU64::new(0),
        }
    }

    /// Handle one user turn and return the assistant's message
    ///
    /// Live-data fetches for the turn run concurrently and are all settled
    /// before composition. A turn whose fetches settle after a newer turn
    /// has started discards its live data rather than rendering stale
    /// records.
    pub async fn handle_input(&self, text: &str, origin: InputOrigin) -> Message {
        let started = Instant::now();
        let this_turn = self.turn_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let (results, documents) = {
            let mut state = self.state.lock();
            let kind = match origin {
                InputOrigin::Typed => MessageKind::Text,
                InputOrigin::Voice => MessageKind::Voice,
            };
            state.push(text.to_string(), Role::User, kind, None);

            let documents: Vec<Document> = state.store.documents().to_vec();
            let results = self.scorer.search(text, &documents);
            (results, documents)
        };

        let mut intent = QueryIntent::detect(text);
        let mut live = self.gateway.fetch(intent).await;

        if self.turn_seq.load(Ordering::SeqCst) != this_turn {
            log::debug!("Turn {} superseded; discarding its live data", this_turn);
            live = LiveDataSet::default();
            intent = QueryIntent::default();
        }

        let composition = composer::compose(
            text,
            &results,
            &live,
            intent,
            &documents,
            self.overview_chars,
        );

        let metadata = ResponseMetadata {
            data_source: composition.kind.data_source_label().to_string(),
            api_calls: intent.api_labels(),
            processing_time: started.elapsed().as_millis() as u64,
            document_sources: composition.document_sources.clone(),
            has_documents: !results.is_empty(),
        };

        let kind = match composition.kind {
            composer::ResponseKind::Hybrid => MessageKind::Hybrid,
            composer::ResponseKind::Document => MessageKind::Document,
            composer::ResponseKind::DataInsight => MessageKind::DataInsight,
            composer::ResponseKind::Text => MessageKind::Text,
        };

        let mut state = self.state.lock();
        state.push(composition.content, Role::Assistant, kind, Some(metadata))
    }

    /// Store an upload and append the acknowledgment message
    pub fn add_document(
        &self,
        name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<Message, AssistantError> {
        let mut state = self.state.lock();
        let (doc_name, chunk_count) = {
            let doc = state
                .store
                .add_document(name, mime_type, bytes.len() as u64, bytes)?;
            (doc.name.clone(), doc.chunks.len())
        };

        let content = format!(
            "**Document uploaded: {}** ({} chunk(s)).\n\n\
             Ask about its content, or combine it with live Revere data:\n\
             - \"What is this document about?\"\n\
             - \"Summarize this with today's weather\"",
            doc_name, chunk_count
        );
        let metadata = ResponseMetadata {
            data_source: "Document Upload".to_string(),
            api_calls: Vec::new(),
            processing_time: 0,
            document_sources: Some(vec![doc_name]),
            has_documents: true,
        };
        Ok(state.push(content, Role::Assistant, MessageKind::Document, Some(metadata)))
    }

    pub fn remove_document(&self, id: &str) -> bool {
        self.state.lock().store.remove_document(id)
    }

    pub fn clear_documents(&self) {
        self.state.lock().store.clear();
    }

    /// Snapshot of (id, name, chunk count) per uploaded document
    pub fn document_summaries(&self) -> Vec<(String, String, usize)> {
        self.state
            .lock()
            .store
            .documents()
            .iter()
            .map(|doc| (doc.id.clone(), doc.name.clone(), doc.chunks.len()))
            .collect()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_data::testing::FakeSource;
    use crate::live_data::WEATHER_SOURCE;
    use std::sync::Arc;
    use std::time::Duration;

    fn engine_with(source: FakeSource) -> ConversationEngine {
        let config = AppConfig::default();
        let gateway = LiveDataGateway::new(Arc::new(source));
        ConversationEngine::new(&config, gateway)
    }

    #[tokio::test]
    async fn budget_document_plus_weather_query_goes_hybrid() {
        let engine = engine_with(FakeSource::all_ok());
        engine
            .add_document("budget.txt", "text/plain", b"the city budget for snow removal")
            .unwrap();

        let reply = engine
            .handle_input("weather and my budget document", InputOrigin::Typed)
            .await;

        assert_eq!(reply.kind, MessageKind::Hybrid);
        assert!(reply.content.contains("budget"));
        assert!(reply.content.contains("Weather: 58°F"));

        let metadata = reply.metadata.unwrap();
        assert!(metadata.has_documents);
        assert_eq!(metadata.api_calls, vec![WEATHER_SOURCE.to_string()]);
        assert_eq!(metadata.data_source, "Hybrid (Documents + Live APIs)");
    }

    #[tokio::test]
    async fn has_documents_tracks_result_set() {
        let engine = engine_with(FakeSource::all_ok());

        let reply = engine.handle_input("what's the weather", InputOrigin::Typed).await;
        let metadata = reply.metadata.unwrap();
        assert!(!metadata.has_documents);
        assert_eq!(reply.kind, MessageKind::DataInsight);
    }

    #[tokio::test]
    async fn provider_failure_keeps_remaining_sections() {
        let mut source = FakeSource::all_ok();
        source.weather = None;
        let engine = engine_with(source);

        let reply = engine
            .handle_input("weather, train times and census data", InputOrigin::Typed)
            .await;

        assert!(!reply.content.contains("Weather:"));
        assert!(reply.content.contains("Transit:"));
        assert!(reply.content.contains("Demographics:"));
    }

    #[tokio::test]
    async fn voice_origin_is_recorded_on_the_user_message() {
        let engine = engine_with(FakeSource::all_ok());
        engine.handle_input("hello", InputOrigin::Voice).await;

        let messages = engine.messages();
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].kind, MessageKind::Voice);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn upload_acknowledgment_is_appended() {
        let engine = engine_with(FakeSource::all_ok());
        let ack = engine
            .add_document("notes.txt", "text/plain", b"meeting notes")
            .unwrap();

        assert_eq!(ack.kind, MessageKind::Document);
        assert!(ack.content.contains("notes.txt"));
        assert_eq!(engine.document_summaries().len(), 1);
    }

    #[tokio::test]
    async fn superseded_turn_discards_its_live_data() {
        let mut source = FakeSource::all_ok();
        source.delay = Some(Duration::from_millis(50));
        let engine = Arc::new(engine_with(source));

        let slow_engine = engine.clone();
        let slow = tokio::spawn(async move {
            slow_engine
                .handle_input("what's the weather", InputOrigin::Typed)
                .await
        });

        // Let the slow turn issue its fetch, then start a newer turn
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.handle_input("hello assistant", InputOrigin::Typed).await;

        let stale_reply = slow.await.unwrap();
        assert!(!stale_reply.content.contains("Weather:"));
        assert!(stale_reply.metadata.unwrap().api_calls.is_empty());
    }

    #[tokio::test]
    async fn message_log_is_append_only_and_ordered() {
        let engine = engine_with(FakeSource::all_ok());
        engine.handle_input("first", InputOrigin::Typed).await;
        engine.handle_input("second", InputOrigin::Typed).await;

        let messages = engine.messages();
        assert_eq!(messages.len(), 4);
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["msg_1", "msg_2", "msg_3", "msg_4"]);
    }
}
