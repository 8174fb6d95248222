//! Method dispatch table.
//!
//! Each arm reuses the same store/business logic the HTTP surface calls
//! (`api/sessions.rs`, `api/chat.rs`, `api/schedules.rs`, ...) rather than
//! re-deriving it — the RPC and HTTP boundaries are two skins over one
//! internal API, per SPEC_FULL §9's "standardize on a single result type
//! at all internal boundaries" note.
//!
//! Every method `required_scope` declares a branch here; `dispatch`
//! returns `not_found` for anything else, so the match stays exhaustive
//! over the table rather than silently falling through.

use serde::Deserialize;
use serde_json::json;

use crate::runtime::{compact, run_turn, TurnEvent, TurnInput};
use crate::state::AppState;

use super::frame::RpcError;

pub async fn dispatch(
    state: &AppState,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, RpcError> {
    match method {
        "sessions.list" => {
            let sessions = state.sessions.list();
            Ok(json!({ "sessions": sessions, "count": sessions.len() }))
        }
        "sessions.preview" => {
            let key: KeyParam = parse(params)?;
            state
                .sessions
                .get(&key.session_key)
                .map(|e| json!(e))
                .ok_or_else(|| not_found("session not found"))
        }
        "sessions.resolve" => {
            let p: ResolveParams = parse(params)?;
            let resolved_peer = p.peer_id.as_deref().map(|pid| state.identity.resolve(pid));
            let meta = sa_domain::config::InboundMetadata {
                channel: p.channel.clone(),
                account_id: p.account_id.clone(),
                peer_id: resolved_peer.clone(),
                group_id: p.group_id.clone(),
                channel_id: p.channel_id.clone(),
                thread_id: p.thread_id.clone(),
                is_direct: p.is_direct,
            };
            let session_key =
                sa_sessions::compute_session_key(&state.config.sessions.agent_id, &meta);
            let origin = sa_sessions::store::SessionOrigin {
                channel: p.channel,
                account: p.account_id,
                peer: resolved_peer,
                group: p.group_id,
            };
            let (entry, is_new) = state.sessions.resolve_or_create(&session_key, origin);
            Ok(json!({ "session": entry, "is_new": is_new }))
        }
        "sessions.reset" => {
            let key: KeyParam = parse(params)?;
            state
                .sessions
                .reset_session(&key.session_key, "rpc reset")
                .map(|e| json!({ "session_key": e.session_key, "session_id": e.session_id }))
                .ok_or_else(|| not_found("session not found"))
        }
        "sessions.compact" => {
            let key: KeyParam = parse(params)?;
            let entry = state
                .sessions
                .get(&key.session_key)
                .ok_or_else(|| not_found("session not found"))?;
            let provider = crate::runtime::resolve_summarizer(state).ok_or_else(|| {
                RpcError::new("service_unavailable", "no summarizer provider available")
            })?;
            let lines = state
                .transcripts
                .read(&entry.session_id)
                .map_err(|e| RpcError::from_domain_error(&e))?;
            compact::run_compaction(
                provider.as_ref(),
                &state.transcripts,
                &entry.session_id,
                &lines,
                &state.config.compaction,
            )
            .await
            .map(|summary| json!({ "compacted": true, "summary": summary }))
            .map_err(|e| RpcError::from_domain_error(&e))
        }
        "sessions.patch" => {
            let p: SessionPatchParams = parse(params)?;
            let patch = sa_sessions::store::SessionPatch {
                model: p.model,
                thinking: p.thinking,
                auth_profile: p.auth_profile,
            };
            match state.sessions.patch_session(&p.session_key, patch) {
                Some(Ok(entry)) => Ok(json!({ "session": entry })),
                Some(Err(e)) => Err(RpcError::new("invalid_request", e.to_string())),
                None => Err(not_found("session not found")),
            }
        }
        "sessions.delete" => {
            let key: KeyParam = parse(params)?;
            state
                .sessions
                .delete_session(&key.session_key)
                .map(|e| json!({ "deleted": true, "session_id": e.session_id }))
                .ok_or_else(|| not_found("session not found"))
        }

        "chat.send" => {
            let p: ChatSendParams = parse(params)?;
            let session_key = p.session_key.clone();
            let _permit = state
                .session_locks
                .acquire(&session_key)
                .await
                .map_err(|_| RpcError::new("rate_limited", "session is busy"))?;
            let entry = state.sessions.get(&session_key).ok_or_else(|| {
                not_found("session not found — call sessions.resolve first")
            })?;
            let input = TurnInput {
                session_key: session_key.clone(),
                session_id: entry.session_id,
                user_message: p.message,
                model: p.model,
                response_format: None,
                agent: None,
            };
            let (run_id, mut rx) = run_turn(state.clone(), input);
            let mut content = String::new();
            while let Some(event) = rx.recv().await {
                match event {
                    TurnEvent::Final { content: c } | TurnEvent::Stopped { content: c } => {
                        content = c;
                    }
                    TurnEvent::Error { message } => {
                        return Err(RpcError::new("internal_error", message));
                    }
                    _ => {}
                }
            }
            Ok(json!({ "run_id": run_id, "session_key": session_key, "content": content }))
        }
        "chat.history" => {
            let key: KeyParam = parse(params)?;
            let entry = state
                .sessions
                .get(&key.session_key)
                .ok_or_else(|| not_found("session not found"))?;
            let lines = state
                .transcripts
                .read(&entry.session_id)
                .map_err(|e| RpcError::from_domain_error(&e))?;
            let boundary = compact::compaction_boundary(&lines);
            Ok(json!({ "lines": &lines[boundary..] }))
        }
        "chat.abort" => {
            let key: KeyParam = parse(params)?;
            Ok(json!({ "cancelled": state.cancel_map.cancel(&key.session_key) }))
        }
        "chat.inject" => Err(RpcError::new(
            "invalid_request",
            "chat.inject is not yet implemented",
        )),

        "agent" => {
            let p: ChatSendParams = parse(params)?;
            let entry = state.sessions.get(&p.session_key).ok_or_else(|| {
                not_found("session not found — call sessions.resolve first")
            })?;
            let input = TurnInput {
                session_key: p.session_key.clone(),
                session_id: entry.session_id,
                user_message: p.message,
                model: p.model,
                response_format: None,
                agent: None,
            };
            let (run_id, _rx) = run_turn(state.clone(), input);
            Ok(json!({ "run_id": run_id }))
        }
        "agent.wait" => {
            let p: RunIdParam = parse(params)?;
            match state.run_store.get(&p.run_id) {
                Some(run) => Ok(json!(run)),
                None => Err(not_found("run not found")),
            }
        }
        "agent.identity" => Ok(json!({ "agent_id": state.config.sessions.agent_id })),

        "channels.status" => Ok(json!({
            "channels": [],
            "note": "channel link state is owned by connector processes; \
                      the core never holds a direct channel connection",
        })),
        "channels.logout" => Err(RpcError::new(
            "invalid_request",
            "channels.logout has no core-side state to clear; the connector \
             owns its own session",
        )),

        "config.get" => Ok(json!(&*state.config)),
        "config.schema" => Ok(json!(sa_domain::config::Config::default())),
        "config.set" | "config.patch" | "config.apply" => Err(RpcError::new(
            "invalid_request",
            "runtime config mutation requires POST /v1/admin/config \
             (this process has no live-swappable config snapshot yet; \
             changes take effect on restart)",
        )),

        "cron.list" => {
            let schedules = state.schedule_store.list().await;
            let views: Vec<_> = schedules.iter().map(|s| s.to_view()).collect();
            Ok(json!({ "schedules": views }))
        }
        "cron.run" => {
            let p: ScheduleIdParam = parse(params)?;
            let schedule = state
                .schedule_store
                .get(&p.id)
                .await
                .ok_or_else(|| not_found("schedule not found"))?;
            crate::runtime::schedule_runner::spawn_scheduled_run(state.clone(), schedule, None)
                .await;
            Ok(json!({ "triggered": true }))
        }
        "cron.remove" => {
            let p: ScheduleIdParam = parse(params)?;
            Ok(json!({ "deleted": state.schedule_store.delete(&p.id).await }))
        }
        "cron.add" | "cron.update" => Err(RpcError::new(
            "invalid_request",
            format!("{method} is not yet implemented over RPC — use the HTTP /v1/schedules API"),
        )),

        "models.list" => Ok(json!({ "providers": state.llm.list_providers() })),

        "skills.status" => Ok(json!({
            "skills": state.skills.list(),
            "readiness": state.skills.readiness_summary(),
        })),

        "nodes.list" => Ok(json!({ "nodes": state.nodes.list() })),
        "nodes.describe" => {
            let p: NodeIdParam = parse(params)?;
            state
                .nodes
                .list()
                .into_iter()
                .find(|n| n.node_id == p.node_id)
                .map(|n| json!(n))
                .ok_or_else(|| not_found("node not found"))
        }
        "nodes.invoke" => {
            let p: NodesInvokeParams = parse(params)?;
            let (content, is_error) =
                crate::runtime::tools::dispatch_tool(state, &p.tool, &p.args, None).await;
            if is_error {
                Err(RpcError::new("internal_error", content))
            } else {
                Ok(json!({ "content": content }))
            }
        }
        "nodes.pair.request" | "nodes.pair.approve" | "nodes.pair.revoke" => Err(RpcError::new(
            "invalid_request",
            format!(
                "{method} is not yet implemented — nodes currently authenticate via \
                 the SA_NODE_TOKENS allowlist, not an interactive pairing handshake"
            ),
        )),

        "tools.approvals.list" => Ok(json!({ "pending": state.approval_store.list_pending() })),
        "tools.approvals.approve" => {
            let p: ApprovalIdParam = parse(params)?;
            if state.approval_store.approve(&p.id) {
                Ok(json!({ "ok": true }))
            } else {
                Err(not_found("no pending approval with that id"))
            }
        }
        "tools.approvals.deny" => {
            let p: ApprovalDenyParams = parse(params)?;
            if state.approval_store.deny(&p.id, p.reason) {
                Ok(json!({ "ok": true }))
            } else {
                Err(not_found("no pending approval with that id"))
            }
        }

        "health" => Ok(json!({ "status": "ok" })),
        "logs.tail" => Err(RpcError::new(
            "invalid_request",
            "logs.tail requires a structured log sink; not wired in this build",
        )),

        _ => Err(not_found("unknown method")),
    }
}

fn not_found(message: impl Into<String>) -> RpcError {
    RpcError::new("not_found", message)
}

fn parse<T: for<'de> Deserialize<'de>>(params: serde_json::Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| {
        RpcError::new("invalid_request", format!("bad params: {e}"))
    })
}

#[derive(Deserialize)]
struct KeyParam {
    session_key: String,
}

#[derive(Deserialize)]
struct RunIdParam {
    run_id: uuid::Uuid,
}

#[derive(Deserialize)]
struct ScheduleIdParam {
    id: uuid::Uuid,
}

#[derive(Deserialize)]
struct NodeIdParam {
    node_id: String,
}

#[derive(Deserialize)]
struct ApprovalIdParam {
    id: uuid::Uuid,
}

#[derive(Deserialize)]
struct ApprovalDenyParams {
    id: uuid::Uuid,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct NodesInvokeParams {
    tool: String,
    #[serde(default)]
    args: serde_json::Value,
}

/// Patch fields for `sessions.patch`. A field absent from the request
/// object leaves that override untouched; present as `null` clears it
/// back to the agent default; present as a value sets it.
#[derive(Deserialize)]
struct SessionPatchParams {
    session_key: String,
    #[serde(default)]
    model: Option<Option<String>>,
    #[serde(default)]
    thinking: Option<Option<String>>,
    #[serde(default)]
    auth_profile: Option<Option<String>>,
}

#[derive(Deserialize)]
struct ChatSendParams {
    session_key: String,
    message: String,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ResolveParams {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    peer_id: Option<String>,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    is_direct: bool,
}
