use chrono::{DateTime, Utc};

use crate::config::RetrievalConfig;
use crate::error::AssistantError;
use crate::extractor;

/// Fixed-length slice of a document's text, the unit of retrieval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub document_id: String,
    pub text: String,
    pub sequence_index: usize,
}

/// An uploaded document and its chunked text
///
/// Owned exclusively by the store; immutable once created apart from
/// whole-document removal.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub raw_text: String,
    pub chunks: Vec<Chunk>,
    pub uploaded_at: DateTime<Utc>,
}

/// Split text into sequential, non-overlapping character slices
///
/// The last chunk may be shorter than `chunk_size`. Deterministic:
/// identical text always yields identical chunks.
pub fn chunk_text(document_id: &str, raw_text: &str, chunk_size: usize) -> Vec<Chunk> {
    assert!(chunk_size > 0, "chunk_size must be positive");

    let mut chunks = Vec::new();
    let mut buf = String::with_capacity(chunk_size.min(raw_text.len()));
    let mut buffered = 0usize;

    for ch in raw_text.chars() {
        buf.push(ch);
        buffered += 1;
        if buffered == chunk_size {
            chunks.push(Chunk {
                document_id: document_id.to_string(),
                text: std::mem::take(&mut buf),
                sequence_index: chunks.len(),
            });
            buffered = 0;
        }
    }
    if !buf.is_empty() {
        chunks.push(Chunk {
            document_id: document_id.to_string(),
            text: buf,
            sequence_index: chunks.len(),
        });
    }

    chunks
}

/// In-memory store of uploaded documents
///
/// Not persisted: the index lives for the lifetime of the engine.
pub struct DocumentStore {
    documents: Vec<Document>,
    chunk_size: usize,
    next_seq: u64,
}

impl DocumentStore {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            documents: Vec::new(),
            chunk_size: config.chunk_size,
            next_seq: 0,
        }
    }

    /// Extract, chunk and store an upload
    ///
    /// Fails only when no extractor covers the format; empty text is
    /// accepted and produces a document with zero chunks.
    pub fn add_document(
        &mut self,
        name: &str,
        mime_type: &str,
        size_bytes: u64,
        bytes: &[u8],
    ) -> Result<&Document, AssistantError> {
        let raw_text = extractor::extract_text(name, mime_type, bytes)?;

        self.next_seq += 1;
        let id = format!("doc_{}_{}", Utc::now().timestamp_micros(), self.next_seq);
        let chunks = chunk_text(&id, &raw_text, self.chunk_size);

        log::info!(
            "Stored document {} ({} bytes, {} chunks)",
            name,
            size_bytes,
            chunks.len()
        );

        self.documents.push(Document {
            id,
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes,
            raw_text,
            chunks,
            uploaded_at: Utc::now(),
        });
        Ok(self.documents.last().expect("document just pushed"))
    }

    /// Remove a document and all of its chunks; true if it existed
    pub fn remove_document(&mut self, id: &str) -> bool {
        let before = self.documents.len();
        self.documents.retain(|doc| doc.id != id);
        before != self.documents.len()
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
