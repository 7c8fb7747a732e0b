//! Upload text extraction
//!
//! Maps an uploaded file's mime type (or extension, when the mime type is
//! generic) to displayable text. Plain-text families are decoded directly;
//! PDF, Word and audio uploads produce a fallback notice instead of a hard
//! failure, since real extraction for those formats is delegated to
//! external services outside this engine.

use crate::error::AssistantError;

/// Format family an upload was classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
    PlainText,
    Pdf,
    Word,
    Audio,
}

/// Classify a mime type / file name pair, or fail when no extractor covers it
pub fn classify(name: &str, mime_type: &str) -> Result<FormatFamily, AssistantError> {
    let mime = mime_type.to_lowercase();
    let lower_name = name.to_lowercase();

    if mime.starts_with("text/") {
        return Ok(FormatFamily::PlainText);
    }
    if mime == "application/pdf" || lower_name.ends_with(".pdf") {
        return Ok(FormatFamily::Pdf);
    }
    if mime.contains("word")
        || mime.contains("officedocument.wordprocessingml")
        || lower_name.ends_with(".docx")
        || lower_name.ends_with(".doc")
    {
        return Ok(FormatFamily::Word);
    }
    if mime.starts_with("audio/") {
        return Ok(FormatFamily::Audio);
    }
    // Extension fallback for uploads that arrive as application/octet-stream
    if lower_name.ends_with(".txt") || lower_name.ends_with(".md") || lower_name.ends_with(".csv") {
        return Ok(FormatFamily::PlainText);
    }

    Err(AssistantError::UnsupportedFormat(format!(
        "{} ({})",
        name, mime_type
    )))
}

/// Extract displayable text from an upload
///
/// Never fails once the format is classified: extraction problems are
/// downgraded to fallback notice text.
pub fn extract_text(name: &str, mime_type: &str, bytes: &[u8]) -> Result<String, AssistantError> {
    let family = classify(name, mime_type)?;

    let text = match family {
        FormatFamily::PlainText => String::from_utf8_lossy(bytes).into_owned(),
        FormatFamily::Pdf => format!(
            "PDF document: {}\n\nText extraction for PDF files is handled by the \
             document service. Ask general questions about the document, or upload \
             a text version for full content analysis.",
            name
        ),
        FormatFamily::Word => format!(
            "Word document: {}\n\nText extraction for Word files is handled by the \
             document service. Ask general questions about the document, or upload \
             a text version for full content analysis.",
            name
        ),
        FormatFamily::Audio => format!(
            "Audio file: {}\n\nTranscription for audio uploads is handled by the \
             voice pipeline. Once transcribed, ask what was discussed or request \
             a summary of the main topics.",
            name
        ),
    };

    Ok(text)
}
