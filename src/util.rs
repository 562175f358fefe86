//! Shared utility functions

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
/// Counts characters rather than bytes so CJK queries are not cut mid-glyph.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Whether `c` is a CJK ideograph (no whitespace word boundaries)
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF      // CJK Unified Ideographs
        | 0x3400..=0x4DBF    // Extension A
        | 0x20000..=0x2A6DF  // Extension B
        | 0xF900..=0xFAFF    // Compatibility Ideographs
    )
}
