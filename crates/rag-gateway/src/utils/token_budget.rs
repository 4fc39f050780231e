//! Prompt budgeting against the deployment tokenizer. The chunker and the
//! lexical analyzer both segment on Unicode word boundaries, so counting the
//! same way here keeps context limits aligned with indexed token counts
//! instead of re-estimating from a per-language heuristic.

use unicode_segmentation::UnicodeSegmentation;

/// Exact token count of `text` under the deployment tokenizer.
pub fn count_tokens(text: &str) -> usize {
    text.unicode_words().count()
}

/// True when appending `text` to a prompt already holding `current_tokens`
/// would break the budget.
pub fn would_exceed(current_tokens: usize, text: &str, max_tokens: usize) -> bool {
    current_tokens + count_tokens(text) > max_tokens
}
