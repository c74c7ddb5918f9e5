/// Fixed per-message cost covering role markers and separators.
pub const MESSAGE_OVERHEAD: u32 = 4;

/// Approximate token count of `text`: one token per four characters,
/// rounded up.
pub fn estimate_text(text: &str) -> u32 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4).min(u32::MAX as u64) as u32
}

/// Token cost of one prompt message carrying `content`.
pub fn estimate_message(content: &str) -> u32 {
    estimate_text(content).saturating_add(MESSAGE_OVERHEAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(estimate_text(""), 0);
        assert_eq!(estimate_message(""), MESSAGE_OVERHEAD);
    }

    #[test]
    fn rounds_up_to_whole_tokens() {
        assert_eq!(estimate_text("abc"), 1);
        assert_eq!(estimate_text("abcd"), 1);
        assert_eq!(estimate_text("abcde"), 2);
    }

    #[test]
    fn counts_chars_not_bytes() {
        // 4 chars, 12 bytes
        assert_eq!(estimate_text("日本語字"), 1);
    }
}
