//! Token counting via tiktoken cl100k_base.
//!
//! The encoder is embedded in the binary and initialized once per process.

use crate::policy::TokenCounter;
use once_cell::sync::OnceCell;
use tiktoken_rs::CoreBPE;

static CL100K: OnceCell<CoreBPE> = OnceCell::new();

fn bpe() -> &'static CoreBPE {
    CL100K.get_or_init(|| {
        tiktoken_rs::cl100k_base().expect("cl100k_base vocabulary is embedded")
    })
}

/// Count tokens in a text with cl100k_base.
pub fn count_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    bpe().encode_with_special_tokens(text).len() as u32
}

/// Per-message token cost: content plus a small per-message framing
/// overhead (role tag and separators in the wire format).
pub fn count_message_tokens(content: &str) -> u32 {
    count_tokens(content) + 4
}

/// The bundled [`TokenCounter`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiktokenCounter;

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> u32 {
        count_tokens(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_known_text_is_nonzero() {
        let n = count_tokens("The quick brown fox jumps over the lazy dog.");
        assert!(n >= 5 && n <= 20, "unexpected count {n}");
    }

    #[test]
    fn test_counter_trait_matches_free_fn() {
        let counter = TiktokenCounter;
        let text = "fn main() { println!(\"hello\"); }";
        assert_eq!(counter.count_tokens(text), count_tokens(text));
    }

    proptest! {
        // Counting is a pure function: same input, same output.
        #[test]
        fn prop_counting_is_deterministic(text in "\\PC{0,200}") {
            prop_assert_eq!(count_tokens(&text), count_tokens(&text));
        }

        // Every token covers at least one byte: non-empty ASCII text
        // counts between 1 and its length.
        #[test]
        fn prop_count_bounded_by_length(text in "[a-z ]{1,120}") {
            let count = count_tokens(&text) as usize;
            prop_assert!(count >= 1);
            prop_assert!(count <= text.len());
        }
    }
}
