//! Extraction prompt.

use hrdocs_shared::DocumentType;

/// Appended when the document text was cut to fit the prompt.
const TRUNCATION_MARKER: &str = "\n[... text truncated ...]";

/// Build the instruction sent to the model for one document.
///
/// `text` is cut to at most `max_input_chars` characters.
pub fn build_prompt(text: &str, labels: &[DocumentType], max_input_chars: usize) -> String {
    let allowed = labels
        .iter()
        .map(|t| t.label())
        .collect::<Vec<_>>()
        .join(", ");
    let body = truncate_chars(text, max_input_chars);

    format!(
        r#"You are an information-extraction assistant for HR documents.
From the raw document text below, extract these fields:
  - person_number
  - document_type   (must be one of: {allowed})
  - country
  - document_code
  - document_name
  - date_from
  - date_to
Answer with a single JSON object of this exact shape and nothing else:
{{
  "person_number": "...",
  "document_type": "...",
  "country": "...",
  "document_code": "...",
  "document_name": "...",
  "date_from": "...",
  "date_to": "..."
}}
Every value is a string. If a field is absent or cannot be determined, use the empty string.
Here is the text:
"""{body}""""#
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..idx]),
        None => text.to_string(),
    }
}
