//! Escaping for untrusted text that may later be rendered as HTML.

/// Replace `& < > " '` with their HTML entities.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Keep at most `max_chars` characters (not bytes).
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Truncate first, then escape, so an entity is never cut in half.
pub fn clean(input: &str, max_chars: usize) -> String {
    escape_html(truncate_chars(input, max_chars))
}
