//! Text helpers shared by the notification channels.

/// Characters of assistant text included in a notification.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Cut `text` to [`MAX_MESSAGE_CHARS`], marking the cut with `...`.
pub fn truncate_message(text: &str) -> String {
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((idx, _)) => format!("{}\n...", &text[..idx]),
        None => text.to_string(),
    }
}

/// `1234567` -> `1,234,567`
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `1,500 total / 1,000 in / 500 out / 200 reasoning`, or `None` when the
/// total is unknown. Zero reasoning tokens are left out.
pub fn token_usage_line(
    total: Option<u64>,
    input: Option<u64>,
    output: Option<u64>,
    reasoning: Option<u64>,
) -> Option<String> {
    let total = total?;
    let mut parts = vec![format!("{} total", format_count(total))];
    if let Some(n) = input {
        parts.push(format!("{} in", format_count(n)));
    }
    if let Some(n) = output {
        parts.push(format!("{} out", format_count(n)));
    }
    if let Some(n) = reasoning.filter(|n| *n > 0) {
        parts.push(format!("{} reasoning", format_count(n)));
    }
    Some(parts.join(" / "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(1234567), "1,234,567");
    }

    #[test]
    fn test_token_usage_line() {
        assert_eq!(token_usage_line(None, Some(1), Some(2), None), None);
        assert_eq!(
            token_usage_line(Some(1500), Some(1000), Some(500), Some(0)).as_deref(),
            Some("1,500 total / 1,000 in / 500 out")
        );
        assert_eq!(
            token_usage_line(Some(10), None, None, Some(3)).as_deref(),
            Some("10 total / 3 reasoning")
        );
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short"), "short");
        let long = "é".repeat(MAX_MESSAGE_CHARS + 5);
        let cut = truncate_message(&long);
        assert!(cut.ends_with("\n..."));
        assert_eq!(cut.chars().count(), MAX_MESSAGE_CHARS + 4);
    }
}
