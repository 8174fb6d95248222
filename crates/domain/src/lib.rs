//! Shared types for the gateway: config, error taxonomy, tool/message
//! shapes, streaming events, and capability descriptors.

pub mod capability;
pub mod config;
pub mod error;
pub mod stream;
pub mod tool;
pub mod trace;

pub use config::Config;
pub use error::{Error, Result};
pub use stream::{BoxStream, StreamEvent, Usage};
pub use tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
