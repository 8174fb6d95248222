//! Transcript compaction — collapses old conversation history into a summary
//! so the context window stays healthy after many turns.
//!
//! Compaction appends a summary marker to the transcript (never rewrites).
//! When loading history, only lines after the last marker are used.
//!
//! Trigger is token pressure, not turn count: `estimated_tokens >=
//! context_window_tokens * 1.2`. The compactable head is split into chunks
//! (`base_chunk_ratio` of what remains, never smaller than `min_chunk_ratio`
//! of the total head) and each chunk is summarized independently, so one
//! LLM call isn't asked to compress an unbounded amount of history.

use sa_domain::config::CompactionConfig;
use sa_domain::error::{Error, Result};
use sa_providers::traits::ChatRequest;
use sa_providers::LlmProvider;
use sa_sessions::transcript::{TranscriptLine, TranscriptWriter};

/// Trigger threshold as a multiple of the configured context window.
const TRIGGER_RATIO: f64 = 1.2;

/// Coarse token estimate: ~4 characters per token (English-text heuristic).
/// Good enough to decide whether to compact; exact counts come from the
/// provider's `Usage` after the call.
fn estimate_tokens(text: &str) -> usize {
    ((text.len() as f64) / 4.0).ceil() as usize
}

fn estimate_lines_tokens(lines: &[TranscriptLine]) -> usize {
    lines.iter().map(|l| estimate_tokens(&l.content)).sum()
}

/// Find the index of the first line after the last compaction marker.
/// Returns 0 if no compaction marker exists.
pub fn compaction_boundary(lines: &[TranscriptLine]) -> usize {
    for i in (0..lines.len()).rev() {
        if is_compaction_marker(&lines[i]) {
            return i; // include the marker itself (it becomes a system message)
        }
    }
    0
}

/// Count active turns (user messages) since the last compaction.
pub fn active_turn_count(lines: &[TranscriptLine]) -> usize {
    let start = compaction_boundary(lines);
    lines[start..].iter().filter(|l| l.role == "user").count()
}

/// Check if auto-compaction should run, given a precomputed boundary
/// (avoids a redundant reverse scan when the caller already has one).
pub fn should_compact_with_boundary(
    lines: &[TranscriptLine],
    config: &CompactionConfig,
    boundary: usize,
) -> bool {
    if !config.auto {
        return false;
    }
    let active_tokens = estimate_lines_tokens(&lines[boundary..]);
    (active_tokens as f64) >= (config.context_window_tokens as f64) * TRIGGER_RATIO
}

/// Check if auto-compaction should run (computes the boundary itself).
pub fn should_compact(lines: &[TranscriptLine], config: &CompactionConfig) -> bool {
    let boundary = compaction_boundary(lines);
    should_compact_with_boundary(lines, config, boundary)
}

/// Split active lines into (lines_to_compact, lines_to_keep).
///
/// `lines_to_keep` are the last `keep_last_turns` worth of turns (measured
/// by user-message count) plus any trailing tool/assistant messages; it
/// always contains at least the last user turn when one exists.
pub fn split_for_compaction(
    lines: &[TranscriptLine],
    keep_last_turns: usize,
) -> (&[TranscriptLine], &[TranscriptLine]) {
    let start = compaction_boundary(lines);
    // Skip the compaction marker itself if present.
    let active_start = match lines.get(start) {
        Some(l) if is_compaction_marker(l) => start + 1,
        _ => start,
    };
    let active = &lines[active_start..];

    // Count user messages backwards to find the keep boundary.
    let mut user_count = 0;
    let mut keep_from = 0; // relative to active
    for (i, line) in active.iter().enumerate().rev() {
        if line.role == "user" {
            user_count += 1;
            if user_count >= keep_last_turns.max(1) {
                keep_from = i;
                break;
            }
        }
    }

    let to_compact = &active[..keep_from];
    let to_keep = &active[keep_from..];
    (to_compact, to_keep)
}

/// Partition `lines` into chunks sized `base_chunk_ratio` of whatever
/// remains, never smaller than `min_chunk_ratio` of the total. The last
/// chunk absorbs any remainder rather than being split below the floor.
pub fn chunk_for_summarization<'a>(
    lines: &'a [TranscriptLine],
    base_chunk_ratio: f64,
    min_chunk_ratio: f64,
) -> Vec<&'a [TranscriptLine]> {
    if lines.is_empty() {
        return vec![];
    }
    let total = lines.len();
    let min_chunk = ((total as f64) * min_chunk_ratio).ceil().max(1.0) as usize;

    let mut chunks = Vec::new();
    let mut remaining = lines;
    while !remaining.is_empty() {
        let target = ((remaining.len() as f64) * base_chunk_ratio).ceil().max(1.0) as usize;
        let take = target.max(min_chunk.min(remaining.len()));
        if remaining.len() - take < min_chunk && remaining.len() > take {
            // Remainder would fall below the floor — absorb it into this chunk.
            chunks.push(remaining);
            break;
        }
        let take = take.min(remaining.len());
        let (chunk, rest) = remaining.split_at(take);
        chunks.push(chunk);
        remaining = rest;
    }
    chunks
}

/// Generate a compaction summary using the LLM (non-streaming).
pub async fn generate_summary(
    provider: &dyn LlmProvider,
    lines_to_compact: &[TranscriptLine],
) -> Result<String> {
    let conversation = build_conversation_text(lines_to_compact);

    let prompt = format!(
        "You are a conversation summarizer. Summarize the following conversation \
         history into a concise summary that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Important facts learned about the user or context\n\
         5. Tool state (running processes, active sessions, pending work)\n\n\
         Be concise but preserve all actionable context. Write in present tense.\n\
         Omit greetings and pleasantries. Focus on substance.\n\n\
         CONVERSATION:\n{conversation}"
    );

    let messages = vec![sa_domain::tool::Message::user(&prompt)];

    let req = ChatRequest {
        messages,
        tools: vec![],
        temperature: Some(0.1),
        max_tokens: Some(2000),
        json_mode: false,
        model: None,
    };

    let resp = provider.chat(req).await?;
    Ok(resp.content)
}

/// Create a transcript line that serves as the compaction marker.
pub fn compaction_line(summary: &str, turns_compacted: usize) -> TranscriptLine {
    let mut line = TranscriptWriter::line("system", summary);
    line.metadata = Some(serde_json::json!({
        "compaction": true,
        "turns_compacted": turns_compacted,
    }));
    line
}

/// Run the full compaction flow: split → chunk → summarize each chunk →
/// persist one marker line joining the chunk summaries in order.
///
/// Returns `Error::CompactionIneffective` if the resulting marker would not
/// reduce the estimated token count of the active transcript — compaction
/// must never make things worse.
pub async fn run_compaction(
    provider: &dyn LlmProvider,
    transcripts: &TranscriptWriter,
    session_id: &str,
    lines: &[TranscriptLine],
    config: &CompactionConfig,
) -> Result<String> {
    let (to_compact, to_keep) = split_for_compaction(lines, config.keep_last_turns);

    if to_compact.is_empty() {
        return Ok(String::new());
    }

    let before_tokens = estimate_lines_tokens(to_compact);
    let turns_compacted = to_compact.iter().filter(|l| l.role == "user").count();

    let chunks = chunk_for_summarization(to_compact, config.base_chunk_ratio, config.min_chunk_ratio);
    let summary_futures = chunks.iter().map(|chunk| generate_summary(provider, chunk));
    let summaries: Vec<String> = futures_util::future::join_all(summary_futures)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let combined_summary = summaries.join("\n\n");
    let marker = compaction_line(&combined_summary, turns_compacted);

    let after_tokens = estimate_tokens(&marker.content);
    if after_tokens >= before_tokens {
        return Err(Error::CompactionIneffective(format!(
            "summary ({after_tokens} est. tokens) did not reduce history \
             ({before_tokens} est. tokens) for session {session_id}"
        )));
    }

    // The marker must land *ahead* of the preserved tail in the active
    // window, not after it — `lines` is append-only, so the only way to
    // get `[MARKER, kept...]` as the new active slice is to re-append
    // `to_keep` behind the marker rather than leaving it where it already
    // sits (before the marker, and therefore before `compaction_boundary`).
    let mut to_append = Vec::with_capacity(1 + to_keep.len());
    to_append.push(marker);
    to_append.extend_from_slice(to_keep);
    transcripts.append(session_id, &to_append)?;

    tracing::info!(
        session_id = session_id,
        turns_compacted = turns_compacted,
        chunk_count = chunks.len(),
        before_tokens,
        after_tokens,
        "transcript compacted"
    );

    Ok(combined_summary)
}

fn is_compaction_marker(line: &TranscriptLine) -> bool {
    line.metadata
        .as_ref()
        .and_then(|m| m.get("compaction"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn build_conversation_text(lines: &[TranscriptLine]) -> String {
    let mut buf = String::new();
    for line in lines {
        let role_label = match line.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            "tool" => "Tool",
            "system" => "System",
            other => other,
        };
        buf.push_str(role_label);
        buf.push_str(": ");
        // Truncate very long lines (tool results) to keep the summary prompt manageable.
        if line.content.len() > 2000 {
            buf.push_str(&line.content[..1000]);
            buf.push_str(" [...] ");
            buf.push_str(&line.content[line.content.len() - 500..]);
        } else {
            buf.push_str(&line.content);
        }
        buf.push('\n');
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(role: &str, content: &str) -> TranscriptLine {
        TranscriptWriter::line(role, content)
    }

    fn compaction(summary: &str) -> TranscriptLine {
        compaction_line(summary, 5)
    }

    fn config(context_window_tokens: usize) -> CompactionConfig {
        CompactionConfig {
            auto: true,
            context_window_tokens,
            keep_last_turns: 1,
            base_chunk_ratio: 0.4,
            min_chunk_ratio: 0.15,
        }
    }

    #[test]
    fn no_compaction_marker() {
        let lines = vec![line("user", "hello"), line("assistant", "hi")];
        assert_eq!(compaction_boundary(&lines), 0);
        assert_eq!(active_turn_count(&lines), 1);
    }

    #[test]
    fn compaction_boundary_after_marker() {
        let lines = vec![
            line("user", "old"),
            line("assistant", "old reply"),
            compaction("summary of old conversation"),
            line("user", "new"),
            line("assistant", "new reply"),
        ];
        assert_eq!(compaction_boundary(&lines), 2);
        // Active turns = only "new" (after marker)
        assert_eq!(active_turn_count(&lines), 1);
    }

    #[test]
    fn should_compact_respects_token_threshold() {
        // Tiny context window so a handful of short messages trip it.
        let cfg = config(10);
        let lines: Vec<_> = (0..20)
            .flat_map(|i| {
                vec![
                    line("user", &format!("message number {i} with some body text")),
                    line("assistant", &format!("reply number {i} with some body text")),
                ]
            })
            .collect();
        assert!(should_compact(&lines, &cfg));
    }

    #[test]
    fn should_not_compact_under_threshold() {
        let cfg = config(200_000);
        let lines = vec![line("user", "hi"), line("assistant", "hello")];
        assert!(!should_compact(&lines, &cfg));
    }

    #[test]
    fn should_not_compact_when_auto_disabled() {
        let mut cfg = config(1);
        cfg.auto = false;
        let lines: Vec<_> = (0..20).map(|i| line("user", &format!("msg {i}"))).collect();
        assert!(!should_compact(&lines, &cfg));
    }

    #[test]
    fn split_keeps_last_turns() {
        let lines: Vec<_> = (0..5)
            .flat_map(|i| {
                vec![
                    line("user", &format!("msg {i}")),
                    line("assistant", &format!("reply {i}")),
                ]
            })
            .collect();

        let (to_compact, to_keep) = split_for_compaction(&lines, 2);
        // 5 turns total, keep last 2 → compact first 3
        let compact_users: Vec<_> = to_compact
            .iter()
            .filter(|l| l.role == "user")
            .map(|l| l.content.as_str())
            .collect();
        assert_eq!(compact_users, vec!["msg 0", "msg 1", "msg 2"]);

        let keep_users: Vec<_> = to_keep
            .iter()
            .filter(|l| l.role == "user")
            .map(|l| l.content.as_str())
            .collect();
        assert_eq!(keep_users, vec!["msg 3", "msg 4"]);
    }

    #[test]
    fn split_never_drops_the_last_user_turn_even_with_zero_keep() {
        let lines = vec![line("user", "only message")];
        let (to_compact, to_keep) = split_for_compaction(&lines, 0);
        assert!(to_compact.is_empty());
        assert_eq!(to_keep.len(), 1);
    }

    #[test]
    fn chunking_splits_large_head_into_multiple_chunks() {
        let lines: Vec<_> = (0..20).map(|i| line("user", &format!("msg {i}"))).collect();
        let chunks = chunk_for_summarization(&lines, 0.4, 0.15);
        assert!(chunks.len() > 1);
        // Every line ends up in exactly one chunk, in order.
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, lines.len());
    }

    #[test]
    fn chunking_never_produces_a_chunk_below_the_floor_except_the_last() {
        let lines: Vec<_> = (0..20).map(|i| line("user", &format!("msg {i}"))).collect();
        let chunks = chunk_for_summarization(&lines, 0.4, 0.15);
        let min_chunk = ((lines.len() as f64) * 0.15).ceil() as usize;
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.len() >= min_chunk);
        }
    }

    #[test]
    fn chunking_empty_input_produces_no_chunks() {
        assert!(chunk_for_summarization(&[], 0.4, 0.15).is_empty());
    }

    #[test]
    fn chunking_small_input_covers_every_line_exactly_once() {
        let lines = vec![line("user", "a"), line("user", "b")];
        let chunks = chunk_for_summarization(&lines, 0.4, 0.15);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| !c.is_empty()));
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, lines.len());
    }

    #[test]
    fn estimate_tokens_is_roughly_chars_over_four() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    struct StubProvider {
        summary: String,
        caps: sa_domain::capability::LlmCapabilities,
    }

    #[async_trait::async_trait]
    impl LlmProvider for StubProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<sa_providers::traits::ChatResponse> {
            Ok(sa_providers::traits::ChatResponse {
                content: self.summary.clone(),
                tool_calls: vec![],
                usage: None,
                model: "stub".to_string(),
                finish_reason: Some("stop".to_string()),
            })
        }

        async fn chat_stream(
            &self,
            _req: ChatRequest,
        ) -> Result<sa_domain::stream::BoxStream<'static, Result<sa_domain::stream::StreamEvent>>>
        {
            unimplemented!("compaction never streams")
        }

        async fn embeddings(
            &self,
            _req: sa_providers::traits::EmbeddingsRequest,
        ) -> Result<sa_providers::traits::EmbeddingsResponse> {
            unimplemented!("compaction never embeds")
        }

        fn capabilities(&self) -> &sa_domain::capability::LlmCapabilities {
            &self.caps
        }

        fn provider_id(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn run_compaction_places_marker_ahead_of_the_preserved_tail() {
        let dir = tempfile::tempdir().unwrap();
        let transcripts = TranscriptWriter::new(dir.path());
        let session_id = "sess-1";

        let lines: Vec<_> = (0..5)
            .flat_map(|i| {
                vec![
                    line("user", &format!("msg {i} is long enough to outweigh the stub summary")),
                    line(
                        "assistant",
                        &format!("reply {i} is long enough to outweigh the stub summary too"),
                    ),
                ]
            })
            .collect();
        transcripts.append(session_id, &lines).unwrap();

        let provider = StubProvider {
            summary: "short summary".to_string(),
            caps: sa_domain::capability::LlmCapabilities::default(),
        };
        let cfg = config(200_000);

        let summary = run_compaction(&provider, &transcripts, session_id, &lines, &cfg)
            .await
            .unwrap();
        assert_eq!(summary, "short summary");

        let after = transcripts.read(session_id).unwrap();
        let boundary = compaction_boundary(&after);

        // The marker must be the first line of the active window, with the
        // preserved tail (last `keep_last_turns` turns) immediately after it
        // — never the other way around, or the last turns get stranded
        // before the marker and vanish from the active context.
        assert!(is_compaction_marker(&after[boundary]));
        let active = &after[boundary..];
        assert!(active.len() > 1, "kept tail must follow the marker");

        let active_users: Vec<_> = active
            .iter()
            .filter(|l| l.role == "user")
            .map(|l| l.content.as_str())
            .collect();
        assert_eq!(active_users, vec!["msg 4 is long enough to outweigh the stub summary"]);
        let active_assistants: Vec<_> = active
            .iter()
            .filter(|l| l.role == "assistant")
            .map(|l| l.content.as_str())
            .collect();
        assert_eq!(
            active_assistants,
            vec!["reply 4 is long enough to outweigh the stub summary too"]
        );
    }
}
