//! Outbound Deliverer — turns a finished assistant message into one or more
//! channel-native send actions, with idempotent delivery keys so a
//! connector's retry of a partially-acknowledged send never double-posts.
//!
//! The gateway itself never talks to Discord/Telegram/etc; it hands back
//! `OutboundAction`s for the connector to execute (see `api/inbound.rs`).
//! This module owns the parts of that contract that must be consistent
//! regardless of which connector is on the other end: chunking and
//! `delivery_key` assignment.

use std::time::Duration;

use uuid::Uuid;

use crate::api::inbound::DedupeStore;

/// Default TTL for remembered delivery keys. Long enough to cover a
/// connector's retry window, short enough not to leak memory across a
/// long-running process.
const DELIVERY_KEY_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Derive the idempotency key a connector must echo back on retry.
pub fn delivery_key(run_id: Uuid, block_index: usize) -> String {
    format!("{run_id}:{block_index}")
}

/// Tracks delivery keys already handed out for a run so that re-delivering
/// the same `(run_id, block_index)` (e.g. a connector retry after a
/// timeout it couldn't confirm) is recognized as a duplicate rather than
/// producing a second user-visible message.
pub struct OutboundDeliverer {
    seen: DedupeStore,
}

impl OutboundDeliverer {
    pub fn new() -> Self {
        Self {
            seen: DedupeStore::new(DELIVERY_KEY_TTL),
        }
    }

    /// Returns `true` if this delivery key was already handed out —
    /// the caller should skip emitting the action rather than ship a
    /// duplicate.
    pub fn already_delivered(&self, key: &str) -> bool {
        self.seen.check_and_insert(key)
    }
}

impl Default for OutboundDeliverer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a reply into chunks respecting a channel's text limit. Tries to
/// split at paragraph / sentence boundaries when possible.
///
/// `None` or a non-positive limit disables chunking.
pub fn chunk_for_channel(text: &str, max_chars: Option<usize>) -> Vec<String> {
    let max = match max_chars {
        Some(m) if m > 0 => m,
        _ => return vec![text.to_string()],
    };

    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max {
            chunks.push(remaining.to_string());
            break;
        }

        // Try to split at a natural boundary. For paragraph/newline/sentence
        // boundaries, include the delimiter in the first chunk so the
        // second chunk starts clean.
        let slice = &remaining[..max];
        let split_at = slice
            .rfind("\n\n")
            .map(|p| p + 1)
            .or_else(|| slice.rfind('\n').map(|p| p + 1))
            .or_else(|| slice.rfind(". ").map(|p| p + 1))
            .or_else(|| slice.rfind(' '))
            .unwrap_or(max);

        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk.trim_end().to_string());
        remaining = rest.trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_key_is_stable_for_same_run_and_block() {
        let run_id = Uuid::new_v4();
        assert_eq!(delivery_key(run_id, 0), delivery_key(run_id, 0));
        assert_ne!(delivery_key(run_id, 0), delivery_key(run_id, 1));
    }

    #[test]
    fn deliverer_flags_repeat_keys_as_already_delivered() {
        let deliverer = OutboundDeliverer::new();
        let key = delivery_key(Uuid::new_v4(), 0);
        assert!(!deliverer.already_delivered(&key));
        assert!(deliverer.already_delivered(&key));
    }

    #[test]
    fn chunk_no_limit_is_unsplit() {
        let chunks = chunk_for_channel("hello world", None);
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn chunk_within_limit_is_unsplit() {
        let chunks = chunk_for_channel("hello world", Some(100));
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn chunk_splits_at_paragraph() {
        let text = "First paragraph.\n\nSecond paragraph.";
        let chunks = chunk_for_channel(text, Some(25));
        assert_eq!(chunks, vec!["First paragraph.", "Second paragraph."]);
    }

    #[test]
    fn chunk_splits_at_sentence() {
        let text = "First sentence. Second sentence. Third sentence.";
        let chunks = chunk_for_channel(text, Some(30));
        assert_eq!(
            chunks,
            vec!["First sentence.", "Second sentence.", "Third sentence."]
        );
    }

    #[test]
    fn chunk_splits_at_space() {
        let text = "abcdef ghijkl mnopqr";
        let chunks = chunk_for_channel(text, Some(12));
        assert_eq!(chunks, vec!["abcdef", "ghijkl", "mnopqr"]);
    }
}
