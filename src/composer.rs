//! Response composition
//!
//! Pure decision engine that fuses scored document excerpts with settled
//! live-data records into one rendered answer. No I/O happens here: every
//! provider call has already settled (or failed to `None`) before this
//! module runs.

use serde::{Deserialize, Serialize};

use crate::document_store::Document;
use crate::live_data::{LiveDataSet, QueryIntent};
use crate::scorer::SearchResult;

/// Query vocabulary that marks an unmatched query as still being about the
/// uploaded documents (drives the overview branch)
const OVERVIEW_TERMS: &[&str] = &[
    "document", "about", "this", "what", "tell", "explain", "summarize", "content", "file",
];

/// Shape of the rendered answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseKind {
    Text,
    Document,
    Hybrid,
    DataInsight,
}

impl ResponseKind {
    pub fn data_source_label(&self) -> &'static str {
        match self {
            ResponseKind::Hybrid => "Hybrid (Documents + Live APIs)",
            ResponseKind::Document => "Uploaded Documents",
            ResponseKind::DataInsight => "Live APIs",
            ResponseKind::Text => "Built-in",
        }
    }
}

/// Per-turn metadata attached to every assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub data_source: String,
    pub api_calls: Vec<String>,
    /// Milliseconds spent handling the turn, stamped by the caller
    pub processing_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_sources: Option<Vec<String>>,
    pub has_documents: bool,
}

/// Rendered answer before the turn engine stamps timing metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub content: String,
    pub kind: ResponseKind,
    /// Deduplicated names of the documents actually quoted
    pub document_sources: Option<Vec<String>>,
}

/// Select a response shape and render it
///
/// Branches are evaluated in priority order; every branch produces
/// non-empty text.
pub fn compose(
    query: &str,
    results: &[SearchResult],
    live: &LiveDataSet,
    intent: QueryIntent,
    documents: &[Document],
    overview_chars: usize,
) -> Composition {
    let query_lower = query.to_lowercase();
    let has_matches = !results.is_empty();

    if !documents.is_empty() {
        if has_matches && intent.any() {
            return compose_hybrid(results, live, documents.len());
        }
        if has_matches {
            return compose_document(&query_lower, results, documents.len());
        }
        return compose_unmatched(&query_lower, query, live, intent, documents, overview_chars);
    }

    if intent.any() {
        return compose_data_insight(live, None);
    }

    compose_help()
}

fn compose_hybrid(results: &[SearchResult], live: &LiveDataSet, document_count: usize) -> Composition {
    let mut sources = Vec::new();
    let mut content = String::from("**Hybrid response: your documents + live Revere data**\n\n");

    content.push_str("**Document insights:**\n\n");
    for result in results {
        content.push_str(&format!(
            "**{}** (relevance {}):\n{}\n\n",
            result.document_name, result.score, result.chunk_text
        ));
        push_source(&mut sources, &result.document_name);
    }

    content.push_str("---\n\n**Live Revere data (current):**\n\n");
    content.push_str(&render_live_sections(live));

    content.push_str(&format!(
        "\nThis answer combines your {} uploaded document(s) with current data from Revere's live feeds.",
        document_count
    ));

    Composition {
        content,
        kind: ResponseKind::Hybrid,
        document_sources: Some(sources),
    }
}

fn compose_document(query_lower: &str, results: &[SearchResult], document_count: usize) -> Composition {
    let mut sources = Vec::new();
    let mut content = String::from("**Analysis based on your documents:**\n\n");

    if query_lower.contains("summarize") || query_lower.contains("summary") {
        content.push_str("**Document summary:**\n\n");
        for result in results {
            content.push_str(&format!(
                "**From {}:**\n{}\n\n",
                result.document_name, result.chunk_text
            ));
            push_source(&mut sources, &result.document_name);
        }
        content.push_str(&format!(
            "This summary uses the most relevant sections from your {} uploaded document(s).",
            document_count
        ));
    } else if query_lower.contains("what")
        || query_lower.contains("explain")
        || query_lower.contains("about")
    {
        content.push_str("**Relevant information:**\n\n");
        for (index, result) in results.iter().enumerate() {
            content.push_str(&format!(
                "**{}** (relevance score {}):\n{}\n\n",
                result.document_name, result.score, result.chunk_text
            ));
            if index + 1 < results.len() {
                content.push_str("---\n\n");
            }
            push_source(&mut sources, &result.document_name);
        }
        content.push_str(&format!(
            "Found {} relevant section(s) that address your question.",
            results.len()
        ));
    } else if query_lower.contains("find")
        || query_lower.contains("search")
        || query_lower.contains("contains")
    {
        content.push_str("**Search results:**\n\n");
        for (index, result) in results.iter().enumerate() {
            content.push_str(&format!(
                "**{}** - match {}:\n{}\n\n",
                result.document_name,
                index + 1,
                result.chunk_text
            ));
            push_source(&mut sources, &result.document_name);
        }
        content.push_str(&format!(
            "Found {} matching section(s) across your documents.",
            results.len()
        ));
    } else {
        content.push_str("**Document content:**\n\n");
        for (index, result) in results.iter().enumerate() {
            content.push_str(&format!(
                "**{}**:\n{}\n\n",
                result.document_name, result.chunk_text
            ));
            if index + 1 < results.len() {
                content.push_str("---\n\n");
            }
            push_source(&mut sources, &result.document_name);
        }
        content.push_str(&format!(
            "This information comes from {} uploaded document(s). Ask specific questions for more targeted answers.",
            document_count
        ));
    }

    Composition {
        content,
        kind: ResponseKind::Document,
        document_sources: Some(sources),
    }
}

/// Documents exist but nothing matched: show an overview, unless the query
/// clearly wanted live data and nothing else
fn compose_unmatched(
    query_lower: &str,
    query: &str,
    live: &LiveDataSet,
    intent: QueryIntent,
    documents: &[Document],
    overview_chars: usize,
) -> Composition {
    let is_overview_query = OVERVIEW_TERMS.iter().any(|term| query_lower.contains(term))
        || query.chars().count() < 20;

    if is_overview_query || !intent.any() {
        return compose_overview(documents, overview_chars);
    }

    compose_data_insight(live, Some(documents.len()))
}

fn compose_overview(documents: &[Document], overview_chars: usize) -> Composition {
    let mut sources = Vec::new();
    let mut content = String::from("**Your uploaded documents:**\n\n");

    for (index, doc) in documents.iter().enumerate() {
        content.push_str(&format!("**{}**\n", doc.name));
        for chunk in doc.chunks.iter().take(2) {
            content.push_str(&truncate_chars(&chunk.text, overview_chars));
            content.push_str("\n\n");
        }
        if doc.chunks.len() > 2 {
            content.push_str(&format!("({} more sections available)\n\n", doc.chunks.len() - 2));
        }
        push_source(&mut sources, &doc.name);
        if index + 1 < documents.len() {
            content.push_str("---\n\n");
        }
    }

    content.push_str(
        "Ask specific questions about your documents for targeted answers:\n\
         - \"What does this document say about [topic]?\"\n\
         - \"Summarize the key points\"\n\
         - \"Find information about [specific term]\"",
    );

    Composition {
        content,
        kind: ResponseKind::Document,
        document_sources: Some(sources),
    }
}

fn compose_data_insight(live: &LiveDataSet, document_count: Option<usize>) -> Composition {
    let mut content = String::from("**Live Revere data:**\n\n");
    content.push_str(&render_live_sections(live));

    if let Some(count) = document_count {
        content.push_str(&format!(
            "\nNote: you have {} document(s) uploaded. Ask about them too.",
            count
        ));
    }

    Composition {
        content,
        kind: ResponseKind::DataInsight,
        document_sources: None,
    }
}

fn compose_help() -> Composition {
    let content = "**Welcome to Revere's assistant.**\n\n\
        Live data available right now:\n\
        - Weather conditions for Revere\n\
        - MBTA Blue Line predictions\n\
        - Population and income figures\n\n\
        Upload text, PDF or Word files to ask questions that combine your \
        documents with live city data.\n\n\
        Try: \"What's the weather?\", \"Show Blue Line predictions\", or \
        \"What's Revere's population?\""
        .to_string();

    Composition {
        content,
        kind: ResponseKind::Text,
        document_sources: None,
    }
}

/// One line per provider that returned a record; absent providers are
/// omitted entirely
fn render_live_sections(live: &LiveDataSet) -> String {
    let mut sections = String::new();
    if let Some(weather) = &live.weather {
        sections.push_str(&format!(
            "Weather: {}°F, {} ({}% humidity) (via {})\n",
            weather.temperature_f, weather.condition, weather.humidity_pct, weather.source
        ));
    }
    if let Some(transit) = &live.transit {
        sections.push_str(&format!(
            "Transit: {} prediction(s) for the {} (via {})\n",
            transit.prediction_count, transit.route, transit.source
        ));
    }
    if let Some(demographics) = &live.demographics {
        sections.push_str(&format!(
            "Demographics: population {}, median income ${} (via {})\n",
            group_thousands(demographics.population),
            group_thousands(demographics.median_income),
            demographics.source
        ));
    }
    sections
}

fn push_source(sources: &mut Vec<String>, name: &str) {
    if !sources.iter().any(|existing| existing == name) {
        sources.push(name.to_string());
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
