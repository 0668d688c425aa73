//! Token estimation and display helpers.

/// Optimistic token count for `text` before the upstream usage is known:
/// `ceil(0.75 * words + chars / 4)`.
pub fn estimate(text: &str) -> u64 {
    let words = text.split_whitespace().count() as f64;
    let chars = text.chars().count() as f64;
    (0.75 * words + chars / 4.0).ceil() as u64
}

/// Human-readable token total, e.g. `512 tokens` or `1.50 TkK`.
pub fn format_tokens(total: u64) -> String {
    const UNITS: [(u64, &str); 5] = [
        (1_000_000_000_000_000, "TkP"),
        (1_000_000_000_000, "TkT"),
        (1_000_000_000, "TkG"),
        (1_000_000, "TkM"),
        (1_000, "TkK"),
    ];

    for (threshold, unit) in UNITS {
        if total >= threshold {
            return format!("{:.2} {unit}", total as f64 / threshold as f64);
        }
    }
    format!("{total} tokens")
}
