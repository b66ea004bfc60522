//! Context-size reduction
//!
//! Keeps the conversation sent to the provider under a token budget. Tokens
//! are estimated from the serialized context (1 token ≈ 4 characters). When
//! over budget, the first entry and the most recent entries survive and the
//! middle is replaced by a single placeholder.

use tracing::debug;

use crate::llm::ContextEntry;

/// Default token budget for the generation context
pub const DEFAULT_CONTEXT_TOKENS: usize = 100_000;

/// Average characters per token (rough estimate)
const CHARS_PER_TOKEN: usize = 4;

/// Number of most recent entries kept when pruning
const KEEP_RECENT: usize = 5;

/// Manages context and token limits
#[derive(Debug, Clone)]
pub struct ContextManager {
    max_tokens: usize,
}

impl ContextManager {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Estimated token count of raw text
    pub fn estimate_tokens(text: &str) -> usize {
        text.chars().count() / CHARS_PER_TOKEN
    }

    /// Estimated token count of a whole context, measured on its JSON form
    pub fn estimate_context_tokens(entries: &[ContextEntry]) -> usize {
        match serde_json::to_string(entries) {
            Ok(serialized) => Self::estimate_tokens(&serialized),
            Err(_) => entries
                .iter()
                .map(|e| Self::estimate_tokens(&e.text()))
                .sum(),
        }
    }

    /// Prune to the configured budget
    pub fn prune(&self, entries: Vec<ContextEntry>) -> Vec<ContextEntry> {
        Self::prune_to_token_budget(entries, self.max_tokens)
    }

    /// Prune a conversation to fit `target_tokens`.
    ///
    /// Six or fewer entries are never pruned. Otherwise the result is the
    /// first entry, a `[N messages removed to save context]` placeholder and
    /// the last five entries. Call requests and their results are not kept
    /// together, so a pruned context may start a pair mid-way.
    pub fn prune_to_token_budget(
        entries: Vec<ContextEntry>,
        target_tokens: usize,
    ) -> Vec<ContextEntry> {
        if entries.is_empty() {
            return entries;
        }

        let current = Self::estimate_context_tokens(&entries);
        if current <= target_tokens {
            return entries;
        }

        if entries.len() <= KEEP_RECENT + 1 {
            return entries;
        }

        let removed = entries.len() - (KEEP_RECENT + 1);
        debug!(
            "Pruning context: {} entries, ~{} tokens over budget {}, removing {}",
            entries.len(),
            current,
            target_tokens,
            removed
        );

        let mut iter = entries.into_iter();
        let mut pruned = Vec::with_capacity(KEEP_RECENT + 2);
        if let Some(first) = iter.next() {
            pruned.push(first);
        }
        pruned.push(ContextEntry::user(format!(
            "[{} messages removed to save context]",
            removed
        )));
        pruned.extend(iter.skip(removed));
        pruned
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_TOKENS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(n: usize, body: &str) -> Vec<ContextEntry> {
        (0..n)
            .map(|i| ContextEntry::user(format!("{} {}", i, body)))
            .collect()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(ContextManager::estimate_tokens(""), 0);
        assert_eq!(ContextManager::estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn test_under_budget_is_untouched() {
        let entries = conversation(10, "short");
        let pruned = ContextManager::prune_to_token_budget(entries.clone(), 100_000);
        assert_eq!(pruned, entries);
    }

    #[test]
    fn test_over_budget_keeps_first_and_last_five() {
        let entries = conversation(10, &"x".repeat(400));
        let pruned = ContextManager::prune_to_token_budget(entries.clone(), 10);

        assert_eq!(pruned.len(), 7);
        assert_eq!(pruned[0], entries[0]);
        assert_eq!(pruned[1].text(), "[4 messages removed to save context]");
        assert_eq!(&pruned[2..], &entries[5..]);
    }

    #[test]
    fn test_six_entries_never_pruned() {
        let entries = conversation(6, &"x".repeat(400));
        let pruned = ContextManager::prune_to_token_budget(entries.clone(), 1);
        assert_eq!(pruned, entries);
    }

    #[test]
    fn test_seven_entries_removes_one() {
        let entries = conversation(7, &"x".repeat(400));
        let pruned = ContextManager::new(1).prune(entries.clone());
        assert_eq!(pruned.len(), 7);
        assert_eq!(pruned[1].text(), "[1 messages removed to save context]");
        assert_eq!(pruned[6], entries[6]);
    }
}
