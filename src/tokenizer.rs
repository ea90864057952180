//! Token counting utilities.
//!
//! Counts are a whitespace-split approximation: one token per word. They are
//! used for accounting and coarse budgeting only and are not authoritative for
//! the provider, which reports its own usage when it can.
//!
//! Counting scans the input once without allocating, so adversarially large
//! prompts cost time linear in their length and no extra memory.

/// Count whitespace-separated words in `text`.
///
/// Returns 0 for empty or all-whitespace input. Appending text never lowers
/// the count.
pub fn count_tokens(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            in_word = true;
            count += 1;
        }
    }
    count
}

/// Word cap commonly applied by [`Tokenizer::optimize_prompt`].
pub const DEFAULT_MAX_PROMPT_WORDS: usize = 100;

/// Tokenizer for counting and shaping text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tokenizer {
    max_prompt_words: Option<usize>,
}

impl Tokenizer {
    /// Create a tokenizer that does not cap prompts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap optimized prompts at `max_words` words.
    pub fn with_max_prompt_words(mut self, max_words: usize) -> Self {
        self.max_prompt_words = Some(max_words);
        self
    }

    /// Count the number of tokens in the text.
    pub fn count_tokens(&self, text: &str) -> usize {
        count_tokens(text)
    }

    /// Truncate text to at most `max_tokens` words, joined by single spaces.
    ///
    /// Text already within the limit is returned unchanged.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> String {
        if count_tokens(text) <= max_tokens {
            return text.to_string();
        }
        text.split_whitespace()
            .take(max_tokens)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Trim a prompt and collapse internal whitespace runs to single spaces,
    /// keeping at most the configured word cap.
    pub fn optimize_prompt(&self, prompt: &str) -> String {
        let cap = self.max_prompt_words.unwrap_or(usize::MAX);
        prompt
            .split_whitespace()
            .take(cap)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Split text into word windows of `max_tokens` with `overlap_tokens` shared
    /// between consecutive chunks.
    pub fn chunk(&self, text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut chunks = Vec::new();
        if max_tokens == 0 {
            return chunks;
        }
        let mut start = 0;

        while start < words.len() {
            let end = (start + max_tokens).min(words.len());
            chunks.push(words[start..end].join(" "));

            if end >= words.len() {
                break;
            }

            // Always make progress even if overlap >= window.
            start = end.saturating_sub(overlap_tokens).max(start + 1);
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_counting() {
        let tokenizer = Tokenizer::new();
        assert_eq!(tokenizer.count_tokens("Hello, world!"), 2);
        assert_eq!(tokenizer.count_tokens("  leading and   trailing  "), 3);
        assert_eq!(tokenizer.count_tokens("tabs\tand\nnewlines"), 3);
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("   \n\t "), 0);
    }

    #[test]
    fn test_count_is_monotone_under_append() {
        let base = "analyze the quarterly";
        let extended = format!("{} numbers", base);
        assert!(count_tokens(&extended) >= count_tokens(base));
        // Appending to the last word does not add a token.
        assert_eq!(count_tokens("abc"), count_tokens("abcdef"));
    }

    #[test]
    fn test_truncate() {
        let tokenizer = Tokenizer::new();
        assert_eq!(tokenizer.truncate("one two three four", 2), "one two");
        assert_eq!(tokenizer.truncate("one  two", 5), "one  two");
        assert_eq!(tokenizer.truncate("one two", 0), "");
    }

    #[test]
    fn test_optimize_prompt() {
        let tokenizer = Tokenizer::new();
        assert_eq!(
            tokenizer.optimize_prompt("  Summarize   this\n\n text  "),
            "Summarize this text"
        );
        assert_eq!(tokenizer.optimize_prompt(""), "");
    }

    #[test]
    fn test_optimize_prompt_word_cap() {
        let long = vec!["word"; 150].join("  ");
        let uncapped = Tokenizer::new().optimize_prompt(&long);
        assert_eq!(count_tokens(&uncapped), 150);

        let tokenizer = Tokenizer::new().with_max_prompt_words(DEFAULT_MAX_PROMPT_WORDS);
        let capped = tokenizer.optimize_prompt(&long);
        assert_eq!(count_tokens(&capped), 100);
        assert!(!capped.contains("  "));

        // Prompts within the cap are only normalized.
        assert_eq!(tokenizer.optimize_prompt(" a   b "), "a b");
        assert_eq!(Tokenizer::new().with_max_prompt_words(0).optimize_prompt("a b"), "");
    }

    #[test]
    fn test_chunk() {
        let tokenizer = Tokenizer::new();
        let chunks = tokenizer.chunk("a b c d e f g", 3, 1);
        assert_eq!(chunks, vec!["a b c", "c d e", "e f g"]);
    }

    #[test]
    fn test_chunk_overlap_larger_than_window() {
        let tokenizer = Tokenizer::new();
        let chunks = tokenizer.chunk("a b c", 2, 5);
        assert_eq!(chunks, vec!["a b", "b c"]);
    }
}
