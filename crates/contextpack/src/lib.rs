//! Deterministic context-pack assembly: workspace files + skills index +
//! user facts, capped and truncated into the system prompt prefix.

pub mod builder;
pub mod injection;
pub mod report;
pub mod truncation;

pub use builder::{ContextPackBuilder, SessionMode, WorkspaceFile};
pub use report::{ContextReport, FileReport};
