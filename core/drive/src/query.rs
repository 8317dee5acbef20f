//! Drive query language helpers.

/// MIME type Drive assigns to folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Escape `value` for use inside a single-quoted Drive query literal.
///
/// Backslashes are doubled first so the escape introduced for a quote
/// cannot itself be reinterpreted.
pub fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Query matching folders whose name equals `name` exactly.
pub fn folder_named(name: &str) -> String {
    format!(
        "mimeType = '{}' and name = '{}'",
        FOLDER_MIME_TYPE,
        escape_literal(name)
    )
}
