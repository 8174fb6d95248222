use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction collapses old conversation history into a summary so the
/// context window doesn't overflow after many turns.
///
/// Auto-compaction triggers on estimated token pressure
/// (`estimated_tokens >= context_window_tokens * 1.2`), not turn count —
/// a session of short messages and a session of long ones hit the same
/// context window at very different turn counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Enable automatic compaction when estimated tokens exceed 1.2x
    /// `context_window_tokens`.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Context window size in tokens the auto-compaction threshold is
    /// computed against.
    #[serde(default = "d_context_window")]
    pub context_window_tokens: usize,
    /// Number of recent turns to keep verbatim after compaction.
    #[serde(default = "d_12")]
    pub keep_last_turns: usize,
    /// Target chunk size for the compactable head, as a fraction of the
    /// remaining (not-yet-chunked) portion. Each chunk is summarized
    /// independently.
    #[serde(default = "d_base_chunk_ratio")]
    pub base_chunk_ratio: f64,
    /// No chunk is split smaller than this fraction of the total
    /// compactable head — avoids one-line summarization calls.
    #[serde(default = "d_min_chunk_ratio")]
    pub min_chunk_ratio: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            context_window_tokens: d_context_window(),
            keep_last_turns: 12,
            base_chunk_ratio: d_base_chunk_ratio(),
            min_chunk_ratio: d_min_chunk_ratio(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls automatic memory capture — the always-on behaviour that
/// makes the agent feel alive across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLifecycleConfig {
    /// Automatically capture each turn to long-term memory.
    #[serde(default = "d_true")]
    pub auto_capture: bool,
    /// Ingest a session summary to memory when compaction runs.
    #[serde(default = "d_true")]
    pub capture_on_compaction: bool,
}

impl Default for MemoryLifecycleConfig {
    fn default() -> Self {
        Self {
            auto_capture: true,
            capture_on_compaction: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_12() -> usize {
    12
}
fn d_context_window() -> usize {
    200_000
}
fn d_base_chunk_ratio() -> f64 {
    0.4
}
fn d_min_chunk_ratio() -> f64 {
    0.15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = CompactionConfig::default();
        assert_eq!(cfg.context_window_tokens, 200_000);
        assert!((cfg.base_chunk_ratio - 0.4).abs() < f64::EPSILON);
        assert!((cfg.min_chunk_ratio - 0.15).abs() < f64::EPSILON);
        assert_eq!(cfg.keep_last_turns, 12);
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let cfg: CompactionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.context_window_tokens, 200_000);
        assert!(cfg.auto);
    }
}
