use std::time::Duration;

/// Shared error type used across all SerialAgent crates.
///
/// Every variant maps to exactly one wire error `code` via [`Error::rpc_code`].
/// The mapping is the only place that translation happens — call sites
/// should match on `Error` directly rather than re-deriving a code string.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("SerialMemory: {0}")]
    SerialMemory(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    /// Malformed or semantically invalid request. Wire code `invalid_request`.
    #[error("validation: {0}")]
    Validation(String),

    /// Missing or invalid credentials. Wire code `unauthorized`.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Valid credentials, insufficient scope. Wire code `forbidden`.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No such resource. Wire code `not_found`.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request conflicts with current state (e.g. duplicate idempotency key
    /// with a different body). Wire code `conflict`.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller exceeded a rate limit or quota; `retry_after` is advisory.
    /// Wire code `rate_limited`.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The agent run did not complete within its deadline. Wire code
    /// `agent_timeout`.
    #[error("agent timeout: {0}")]
    AgentTimeout(String),

    /// Every credential in the provider's auth pool is cooling down or
    /// disabled. Wire code `provider_unavailable`.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Outbound delivery target has no linked channel/account. Wire code
    /// `channel_not_linked`.
    #[error("channel not linked: {0}")]
    ChannelNotLinked(String),

    /// Compaction ran but did not reduce history below the target ratio.
    /// Wire code `compaction_ineffective`.
    #[error("compaction ineffective: {0}")]
    CompactionIneffective(String),

    /// Run was cancelled via `chat.abort` or process shutdown drain. Wire
    /// code `aborted`.
    #[error("aborted: {0}")]
    Aborted(String),

    /// Process is draining or a dependency is down. Wire code
    /// `service_unavailable`.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Unexpected internal failure. Always logged with `correlation_id`
    /// before being returned to a caller. Wire code `internal_error`.
    #[error("internal error ({correlation_id}): {message}")]
    Internal {
        message: String,
        correlation_id: String,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Translate to the closed wire `code` enumeration. Used only at RPC/
    /// HTTP response boundaries — internal call sites should match on the
    /// `Error` variant itself.
    pub fn rpc_code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "invalid_request",
            Error::Unauthorized(_) | Error::Auth(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) | Error::SkillNotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::RateLimited { .. } => "rate_limited",
            Error::AgentTimeout(_) | Error::Timeout(_) => "agent_timeout",
            Error::ProviderUnavailable(_) | Error::Provider { .. } => "provider_unavailable",
            Error::ChannelNotLinked(_) => "channel_not_linked",
            Error::CompactionIneffective(_) => "compaction_ineffective",
            Error::Aborted(_) => "aborted",
            Error::ServiceUnavailable(_) => "service_unavailable",
            Error::Io(_)
            | Error::Json(_)
            | Error::Http(_)
            | Error::SerialMemory(_)
            | Error::Config(_)
            | Error::Internal { .. }
            | Error::Other(_) => "internal_error",
        }
    }

    /// Build an `Internal` error, generating a fresh correlation id. Callers
    /// should log the full error (with cause chain) before returning it;
    /// only `correlation_id` should cross the wire.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// `true` for conditions a client can usefully retry without changing
    /// the request (rate limits, provider exhaustion, service draining).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. } | Error::ProviderUnavailable(_) | Error::ServiceUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_code_covers_the_closed_enumeration() {
        assert_eq!(Error::Validation("x".into()).rpc_code(), "invalid_request");
        assert_eq!(Error::Unauthorized("x".into()).rpc_code(), "unauthorized");
        assert_eq!(Error::Forbidden("x".into()).rpc_code(), "forbidden");
        assert_eq!(Error::NotFound("x".into()).rpc_code(), "not_found");
        assert_eq!(Error::Conflict("x".into()).rpc_code(), "conflict");
        assert_eq!(
            Error::RateLimited {
                message: "x".into(),
                retry_after: None
            }
            .rpc_code(),
            "rate_limited"
        );
        assert_eq!(Error::AgentTimeout("x".into()).rpc_code(), "agent_timeout");
        assert_eq!(
            Error::ProviderUnavailable("x".into()).rpc_code(),
            "provider_unavailable"
        );
        assert_eq!(
            Error::ChannelNotLinked("x".into()).rpc_code(),
            "channel_not_linked"
        );
        assert_eq!(
            Error::CompactionIneffective("x".into()).rpc_code(),
            "compaction_ineffective"
        );
        assert_eq!(Error::Aborted("x".into()).rpc_code(), "aborted");
        assert_eq!(
            Error::ServiceUnavailable("x".into()).rpc_code(),
            "service_unavailable"
        );
        assert_eq!(Error::internal("x").rpc_code(), "internal_error");
    }

    #[test]
    fn internal_generates_distinct_correlation_ids() {
        let a = Error::internal("boom");
        let b = Error::internal("boom");
        let (Error::Internal { correlation_id: ca, .. }, Error::Internal { correlation_id: cb, .. }) =
            (&a, &b)
        else {
            unreachable!()
        };
        assert_ne!(ca, cb);
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::RateLimited {
            message: "x".into(),
            retry_after: None
        }
        .is_retryable());
        assert!(Error::ProviderUnavailable("x".into()).is_retryable());
        assert!(!Error::Validation("x".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
    }
}
