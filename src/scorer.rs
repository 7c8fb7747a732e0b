//! Lexical relevance scoring over document chunks
//!
//! Literal term-overlap ranking, not semantic similarity. Scores are
//! integers so ordering is exact and runs are reproducible.

use crate::config::RetrievalConfig;
use crate::document_store::Document;

/// Tokens dropped before scoring
const STOPWORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "and", "a", "to", "are", "as", "was", "for", "in", "of",
    "with", "by", "from", "that", "this", "it",
];

/// Query vocabulary that signals a question about the documents themselves
const META_TERMS: &[&str] = &[
    "document", "summarize", "main", "key", "important", "about", "what", "tell", "explain",
    "this",
];

/// Generic terms that qualify an unmatched query for the overview fallback
const GENERAL_TERMS: &[&str] = &[
    "what", "about", "document", "this", "tell", "explain", "summarize", "content",
];

/// Two query tokens within this many characters of each other earn a
/// proximity point
const PROXIMITY_WINDOW: usize = 100;

/// One scored excerpt, ephemeral per query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub chunk_text: String,
    pub document_name: String,
    pub score: u32,
}

pub struct LexicalScorer {
    top_k: usize,
    excerpt_chars: usize,
}

impl LexicalScorer {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            excerpt_chars: config.excerpt_chars,
        }
    }

    /// Rank chunks against a query, highest score first, capped at `top_k`
    ///
    /// Every returned result has score > 0. When nothing matches but the
    /// query reads like a general question about the uploaded documents,
    /// the first chunk of each document is returned at a nominal score of
    /// 1 so vague questions still get a grounded answer.
    pub fn search(&self, query: &str, documents: &[Document]) -> Vec<SearchResult> {
        let query_lower = query.to_lowercase().trim().to_string();
        if query_lower.is_empty() || documents.is_empty() {
            return Vec::new();
        }

        let tokens: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|word| word.chars().count() > 2 && !STOPWORDS.contains(word))
            .collect();
        let has_meta_term = META_TERMS.iter().any(|term| query_lower.contains(term));

        let mut results = Vec::new();
        for doc in documents {
            for chunk in &doc.chunks {
                let chunk_lower = chunk.text.to_lowercase();
                let mut score = 0u32;

                for &token in &tokens {
                    score += 5 * count_word_matches(&chunk_lower, token);
                    if chunk_lower.contains(token) {
                        score += 2;
                    }

                    if tokens.len() > 1 {
                        if let Some(pos) = chunk_lower.find(token) {
                            for &other in &tokens {
                                if other == token {
                                    continue;
                                }
                                if let Some(other_pos) = chunk_lower.find(other) {
                                    if pos.abs_diff(other_pos) < PROXIMITY_WINDOW {
                                        score += 1;
                                    }
                                }
                            }
                        }
                    }
                }

                if has_meta_term {
                    score += 3;
                }

                if score > 0 {
                    results.push(SearchResult {
                        chunk_text: truncate_chars(&chunk.text, self.excerpt_chars),
                        document_name: doc.name.clone(),
                        score,
                    });
                }
            }
        }

        // Stable sort keeps upload/chunk order among ties, so identical
        // inputs always produce identical output
        results.sort_by(|a, b| b.score.cmp(&a.score));
        results.truncate(self.top_k);

        if results.is_empty() && is_general_query(&query_lower) {
            for doc in documents {
                if let Some(first) = doc.chunks.first() {
                    results.push(SearchResult {
                        chunk_text: truncate_chars(&first.text, self.excerpt_chars),
                        document_name: doc.name.clone(),
                        score: 1,
                    });
                }
            }
            results.truncate(self.top_k);
        }

        results
    }
}

/// Whole-word occurrences of `token` in `haystack` (both lowercase)
fn count_word_matches(haystack: &str, token: &str) -> u32 {
    let mut count = 0;
    for (pos, matched) in haystack.match_indices(token) {
        let before_ok = haystack[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[pos + matched.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            count += 1;
        }
    }
    count
}

fn is_general_query(query_lower: &str) -> bool {
    GENERAL_TERMS.iter().any(|term| query_lower.contains(term))
        || query_lower.chars().count() < 20
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
