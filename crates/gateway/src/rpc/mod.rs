//! The connection-oriented RPC surface at `/v1/rpc/ws` — a single
//! frame-multiplexed WebSocket standing in for every REST/SSE endpoint a
//! long-lived client (desktop app, voice bridge) would otherwise have to
//! poll or juggle multiple connections for.

pub mod dispatch;
pub mod frame;
pub mod scopes;
pub mod ws;
