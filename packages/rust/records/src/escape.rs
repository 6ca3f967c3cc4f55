//! Field escaping for pipe-delimited records.
//!
//! Scheme: `\` → `\\`, `|` → `\|`, LF → `\n`, CR → `\r`. After escaping a
//! value contains no raw delimiter or line break, so a line always splits
//! into exactly as many fields as were joined.

/// Field delimiter of the bulk file.
pub const DELIMITER: char = '|';

const ESCAPE: char = '\\';

/// Escape a single field value.
pub fn escape_field(value: &str) -> String {
    if !value.contains([DELIMITER, ESCAPE, '\n', '\r']) {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        match c {
            DELIMITER => out.push_str("\\|"),
            ESCAPE => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Escape each value and join with the delimiter.
pub fn join_fields<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| escape_field(v.as_ref()))
        .collect::<Vec<_>>()
        .join("|")
}

/// Split a line on unescaped delimiters and unescape each field.
///
/// Unknown escape sequences keep the escaped character; a trailing lone
/// backslash is kept as-is.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some(other) => current.push(other),
                None => current.push(ESCAPE),
            },
            DELIMITER => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}
