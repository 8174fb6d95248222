//! `/v1/rpc/ws` — the RPC connection.
//!
//! Structurally this mirrors `nodes/ws.rs`: wait for the first frame
//! (`hello` instead of `node_hello`), reply with a welcome frame
//! (`hello_ok`), then split into a writer task draining an outbound
//! `mpsc` channel and a reader loop that dispatches inbound requests —
//! same shape, different vocabulary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

use super::dispatch::dispatch;
use super::frame::{
    AuthResult, Features, HelloParams, InboundFrame, OutboundFrame, Policy, RpcError, ServerInfo,
    PROTOCOL_VERSION,
};
use super::scopes::{required_scope, resolve_role, Role};

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const TICK_INTERVAL: Duration = Duration::from_secs(30);
const MAX_PAYLOAD: usize = 16 * 1024 * 1024;
const MAX_BUFFERED: usize = 256;

pub(crate) const METHODS: &[&str] = &[
    "sessions.list",
    "sessions.preview",
    "sessions.resolve",
    "sessions.patch",
    "sessions.delete",
    "sessions.reset",
    "sessions.compact",
    "chat.send",
    "chat.history",
    "chat.abort",
    "agent",
    "agent.wait",
    "agent.identity",
    "channels.status",
    "config.get",
    "config.schema",
    "cron.list",
    "cron.run",
    "cron.remove",
    "models.list",
    "skills.status",
    "nodes.list",
    "nodes.describe",
    "nodes.invoke",
    "tools.approvals.list",
    "tools.approvals.approve",
    "tools.approvals.deny",
    "health",
];
const EVENTS: &[&str] = &["agent", "chat", "tick", "shutdown", "snapshot"];

pub async fn rpc_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let hello = match wait_for_hello(&mut ws_stream).await {
        Some(h) => h,
        None => {
            tracing::debug!("rpc connection closed before hello");
            return;
        }
    };

    if hello.max_protocol < PROTOCOL_VERSION || hello.min_protocol > PROTOCOL_VERSION {
        let err = RpcError::new(
            "invalid_request",
            format!(
                "protocol version mismatch: server speaks {PROTOCOL_VERSION}, client range [{}, {}]",
                hello.min_protocol, hello.max_protocol
            ),
        );
        let _ = send_frame(&mut ws_sink, &OutboundFrame::Error(err)).await;
        return;
    }

    let role = match resolve_role(
        hello.auth.token.as_deref(),
        &state.api_token_hash,
        &state.admin_token_hash,
    ) {
        Some(r) => r,
        None => {
            let err = RpcError::new("unauthorized", "invalid or missing token");
            let _ = send_frame(&mut ws_sink, &OutboundFrame::Error(err)).await;
            return;
        }
    };

    let conn_id = uuid::Uuid::new_v4().to_string();
    let snapshot = build_snapshot(&state);

    let hello_ok = OutboundFrame::HelloOk {
        protocol: PROTOCOL_VERSION,
        server: ServerInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: None,
            conn_id: conn_id.clone(),
        },
        features: Features {
            methods: METHODS.to_vec(),
            events: EVENTS.to_vec(),
        },
        snapshot: snapshot.clone(),
        auth: AuthResult {
            device_token: None,
            role: role.as_str(),
            scopes: role.scopes(),
        },
        policy: Policy {
            max_payload: MAX_PAYLOAD,
            max_buffered: MAX_BUFFERED,
            tick_interval_ms: TICK_INTERVAL.as_millis() as u64,
        },
    };
    if send_frame(&mut ws_sink, &hello_ok).await.is_err() {
        return;
    }

    tracing::info!(conn_id = %conn_id, role = %role.as_str(), client = %hello.client.id, "rpc connection established");

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(MAX_BUFFERED);
    let seq = Arc::new(AtomicU64::new(0));

    let _ = outbound_tx
        .send(OutboundFrame::Event {
            event: "snapshot".into(),
            payload: Some(snapshot),
            seq: Some(next_seq(&seq)),
        })
        .await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if send_frame(&mut ws_sink, &frame).await.is_err() {
                break;
            }
        }
    });

    let tick_tx = outbound_tx.clone();
    let tick_seq = seq.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            let frame = OutboundFrame::Event {
                event: "tick".into(),
                payload: None,
                seq: Some(next_seq(&tick_seq)),
            };
            if tick_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    let shutdown_tx = outbound_tx.clone();
    let shutdown_seq = seq.clone();
    let shutdown_notify = state.shutdown_tx.clone();
    let shutdown_watcher = tokio::spawn(async move {
        shutdown_notify.notified().await;
        let frame = OutboundFrame::Event {
            event: "shutdown".into(),
            payload: Some(serde_json::json!({ "restart_expected_ms": serde_json::Value::Null })),
            seq: Some(next_seq(&shutdown_seq)),
        };
        let _ = shutdown_tx.send(frame).await;
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                let _ = outbound_tx
                    .send(OutboundFrame::Error(RpcError::new(
                        "invalid_request",
                        format!("malformed frame: {e}"),
                    )))
                    .await;
                continue;
            }
        };

        let (id, method, params) = match frame {
            InboundFrame::Req { id, method, params } => (id, method, params),
            InboundFrame::Hello(_) => {
                let _ = outbound_tx
                    .send(OutboundFrame::Error(RpcError::new(
                        "invalid_request",
                        "hello already completed for this connection",
                    )))
                    .await;
                continue;
            }
        };

        let state = state.clone();
        let reply_tx = outbound_tx.clone();
        let run_seq = seq.clone();
        let role = role.clone();
        tokio::spawn(async move {
            let res = handle_request(&state, &role, &method, params, run_seq, reply_tx.clone()).await;
            let frame = match res {
                Ok(payload) => OutboundFrame::Res {
                    id,
                    ok: true,
                    payload: Some(payload),
                    error: None,
                },
                Err(e) => OutboundFrame::Res {
                    id: id.clone(),
                    ok: false,
                    payload: None,
                    error: Some(e.with_request_id(id)),
                },
            };
            let _ = reply_tx.send(frame).await;
        });
    }

    writer.abort();
    ticker.abort();
    shutdown_watcher.abort();
    tracing::info!(conn_id = %conn_id, "rpc connection closed");
}

/// Scope-checks then dispatches a single request. If the method starts a
/// run (`agent`), also spawns the forwarder that streams that run's
/// events back as `event` frames until the run reaches a terminal state.
async fn handle_request(
    state: &AppState,
    role: &Role,
    method: &str,
    params: serde_json::Value,
    seq: Arc<AtomicU64>,
    reply_tx: mpsc::Sender<OutboundFrame>,
) -> Result<serde_json::Value, RpcError> {
    let scope = required_scope(method).ok_or_else(|| RpcError::new("not_found", "unknown method"))?;
    if !role.has(scope) {
        return Err(RpcError::new(
            "forbidden",
            "token does not carry the scope this method requires",
        ));
    }

    let result = dispatch(state, method, params).await?;

    if method == "agent" {
        if let Some(run_id) = result.get("run_id").and_then(|v| v.as_str()) {
            if let Ok(run_id) = run_id.parse::<uuid::Uuid>() {
                spawn_run_forwarder(state, run_id, seq, reply_tx);
            }
        }
    }

    Ok(result)
}

/// Subscribes to a run's `EventBus` sink and re-emits each frame on this
/// connection as an `agent` event, folding the run-local `BusFrame::seq`
/// into this connection's own monotonic counter (per SPEC_FULL §4.7:
/// "each event carries a per-connection seq").
fn spawn_run_forwarder(
    state: &AppState,
    run_id: uuid::Uuid,
    seq: Arc<AtomicU64>,
    reply_tx: mpsc::Sender<OutboundFrame>,
) {
    let mut sink = state.event_bus.subscribe(&run_id);
    tokio::spawn(async move {
        while let Some(bus_frame) = sink.next_frame().await {
            let terminal = bus_frame.is_terminal();
            let frame = OutboundFrame::Event {
                event: "agent".into(),
                payload: serde_json::to_value(&bus_frame).ok(),
                seq: Some(next_seq(&seq)),
            };
            if reply_tx.send(frame).await.is_err() || terminal {
                break;
            }
        }
    });
}

fn next_seq(seq: &AtomicU64) -> u64 {
    seq.fetch_add(1, Ordering::Relaxed) + 1
}

fn build_snapshot(state: &AppState) -> serde_json::Value {
    serde_json::json!({
        "sessions": state.sessions.list().len(),
        "runs_by_status": state.run_store.status_counts(),
        "nodes": state.nodes.list().len(),
    })
}

async fn wait_for_hello(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<HelloParams> {
    let timeout = tokio::time::timeout(HELLO_TIMEOUT, async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(InboundFrame::Hello(hello)) = serde_json::from_str::<InboundFrame>(&text)
                {
                    return Some(hello);
                }
            }
        }
        None
    })
    .await;
    timeout.unwrap_or(None)
}

async fn send_frame(
    sink: &mut (impl SinkExt<Message> + Unpin),
    frame: &OutboundFrame,
) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}
