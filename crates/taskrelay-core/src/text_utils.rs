/// Caps error-body text at `max_chars` so upstream failures do not flood logs.
pub fn truncate_for_error(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let kept = trimmed.chars().take(max_chars).collect::<String>();
    format!("{kept}...")
}
