//! Session key grammar: `agent:{agent_id}:{scope}`.
//!
//! `scope` is one of:
//! - `peer:{channel}:{account}:{peer}`
//! - `group:{channel}:{account}:{group}:{peer?}`
//! - `main:thread:{thread_id}`
//! - `main:topic:{topic_id}`
//! - `subagent:{parent}:{subagent_id}`
//!
//! `build_session_key` and `parse_session_key` are exact inverses: for every
//! `scope` built by the former, the latter recovers the identical value.
//! Only the last field of a scope variant may contain a literal `:`; every
//! other field is treated as an opaque identifier boundary.

use sa_domain::config::InboundMetadata;

/// A parsed/constructed session scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    Peer {
        channel: String,
        account: String,
        peer: String,
    },
    Group {
        channel: String,
        account: String,
        group: String,
        peer: Option<String>,
    },
    MainThread {
        thread_id: String,
    },
    MainTopic {
        topic_id: String,
    },
    Subagent {
        parent: String,
        subagent_id: String,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionKeyError {
    #[error("session key must start with \"agent:\"")]
    MissingAgentPrefix,
    #[error("session key is missing an agent_id")]
    MissingAgentId,
    #[error("unknown scope kind \"{0}\"")]
    UnknownScope(String),
    #[error("malformed {scope} scope (expected at least {expected} fields)")]
    Malformed {
        scope: &'static str,
        expected: usize,
    },
}

/// Build a session key for the given agent and scope. Inverse of
/// [`parse_session_key`].
pub fn build_session_key(agent_id: &str, scope: &SessionScope) -> String {
    let scope_str = match scope {
        SessionScope::Peer {
            channel,
            account,
            peer,
        } => format!("peer:{channel}:{account}:{peer}"),
        SessionScope::Group {
            channel,
            account,
            group,
            peer: None,
        } => format!("group:{channel}:{account}:{group}"),
        SessionScope::Group {
            channel,
            account,
            group,
            peer: Some(peer),
        } => format!("group:{channel}:{account}:{group}:{peer}"),
        SessionScope::MainThread { thread_id } => format!("main:thread:{thread_id}"),
        SessionScope::MainTopic { topic_id } => format!("main:topic:{topic_id}"),
        SessionScope::Subagent {
            parent,
            subagent_id,
        } => format!("subagent:{parent}:{subagent_id}"),
    };
    format!("agent:{agent_id}:{scope_str}")
}

/// Parse a session key into its agent_id and scope. Inverse of
/// [`build_session_key`]: `parse_session_key(&build_session_key(id, &s)) ==
/// Ok((id.to_string(), s))` for every legal `s`.
pub fn parse_session_key(key: &str) -> Result<(String, SessionScope), SessionKeyError> {
    let rest = key
        .strip_prefix("agent:")
        .ok_or(SessionKeyError::MissingAgentPrefix)?;
    let (agent_id, rest) = rest
        .split_once(':')
        .ok_or(SessionKeyError::MissingAgentId)?;
    if agent_id.is_empty() {
        return Err(SessionKeyError::MissingAgentId);
    }

    let (kind, remainder) = rest.split_once(':').unwrap_or((rest, ""));

    let scope = match kind {
        "peer" => {
            let fields: Vec<&str> = remainder.splitn(3, ':').collect();
            if fields.len() != 3 || fields.iter().any(|f| f.is_empty()) {
                return Err(SessionKeyError::Malformed {
                    scope: "peer",
                    expected: 3,
                });
            }
            SessionScope::Peer {
                channel: fields[0].to_string(),
                account: fields[1].to_string(),
                peer: fields[2].to_string(),
            }
        }
        "group" => {
            let fields: Vec<&str> = remainder.splitn(4, ':').collect();
            if fields.len() < 3 || fields[..3].iter().any(|f| f.is_empty()) {
                return Err(SessionKeyError::Malformed {
                    scope: "group",
                    expected: 3,
                });
            }
            SessionScope::Group {
                channel: fields[0].to_string(),
                account: fields[1].to_string(),
                group: fields[2].to_string(),
                peer: fields.get(3).map(|s| s.to_string()),
            }
        }
        "main" => {
            let (sub, value) = remainder.split_once(':').ok_or(SessionKeyError::Malformed {
                scope: "main",
                expected: 2,
            })?;
            match sub {
                "thread" => SessionScope::MainThread {
                    thread_id: value.to_string(),
                },
                "topic" => SessionScope::MainTopic {
                    topic_id: value.to_string(),
                },
                other => return Err(SessionKeyError::UnknownScope(format!("main:{other}"))),
            }
        }
        "subagent" => {
            // Use the last `:` so `parent` may itself contain colons (e.g.
            // be the parent's own full session key) while `subagent_id`
            // stays a plain identifier.
            let (parent, subagent_id) =
                remainder.rsplit_once(':').ok_or(SessionKeyError::Malformed {
                    scope: "subagent",
                    expected: 2,
                })?;
            if parent.is_empty() || subagent_id.is_empty() {
                return Err(SessionKeyError::Malformed {
                    scope: "subagent",
                    expected: 2,
                });
            }
            SessionScope::Subagent {
                parent: parent.to_string(),
                subagent_id: subagent_id.to_string(),
            }
        }
        other => return Err(SessionKeyError::UnknownScope(other.to_string())),
    };

    Ok((agent_id.to_string(), scope))
}

/// Result of validating inbound metadata against the fields a scope needs.
/// `errors` mean the metadata cannot produce a session key at all;
/// `warnings` mean a key can be built but with a fallback field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionKeyValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl SessionKeyValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check that `meta` carries enough information to derive a session key.
/// Direct messages require a `peer_id`; non-direct messages require at
/// least one of `group_id`/`channel_id`. Missing `channel`/`account_id`
/// only warn, since [`resolve_scope`] falls back to `"default"` for them.
pub fn validate_metadata(meta: &InboundMetadata) -> SessionKeyValidation {
    let mut v = SessionKeyValidation::default();

    if meta.channel.as_deref().unwrap_or_default().is_empty() {
        v.warnings.push("missing channel, falling back to \"default\"".into());
    }
    if meta.is_direct {
        if meta.account_id.as_deref().unwrap_or_default().is_empty() {
            v.warnings
                .push("missing account_id, falling back to \"default\"".into());
        }
        if meta.peer_id.as_deref().unwrap_or_default().is_empty() {
            v.errors.push("direct message missing peer_id".into());
        }
    } else if meta.group_id.is_none() && meta.channel_id.is_none() {
        v.errors
            .push("non-direct message missing group_id and channel_id".into());
    }
    v
}

/// Derive the scope for an inbound message from normalized metadata, per
/// the Route Resolver algorithm: direct messages become `Peer`, group/
/// channel messages become `Group`, and an explicit thread_id on a
/// non-direct message nests as the group's peer slot.
pub fn resolve_scope(meta: &InboundMetadata) -> SessionScope {
    let channel = meta.channel.clone().unwrap_or_else(|| "default".into());
    let account = meta.account_id.clone().unwrap_or_else(|| "default".into());

    if meta.is_direct {
        let peer = meta.peer_id.clone().unwrap_or_else(|| "unknown".into());
        return SessionScope::Peer {
            channel,
            account,
            peer,
        };
    }

    let group = meta
        .group_id
        .clone()
        .or_else(|| meta.channel_id.clone())
        .unwrap_or_else(|| "unknown".into());
    let peer = meta.thread_id.clone();
    SessionScope::Group {
        channel,
        account,
        group,
        peer,
    }
}

/// Convenience wrapper combining [`resolve_scope`] and [`build_session_key`]
/// for call sites that don't need the intermediate [`SessionScope`].
pub fn compute_session_key(agent_id: &str, meta: &InboundMetadata) -> String {
    build_session_key(agent_id, &resolve_scope(meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(channel: &str, peer: &str, is_direct: bool) -> InboundMetadata {
        InboundMetadata {
            channel: Some(channel.into()),
            peer_id: Some(peer.into()),
            is_direct,
            ..Default::default()
        }
    }

    #[test]
    fn spec_example_s1_route_a_dm() {
        // S1: binding routes to agent "a1", per-peer scope.
        let key = build_session_key(
            "a1",
            &SessionScope::Peer {
                channel: "x".into(),
                account: "acc".into(),
                peer: "u1".into(),
            },
        );
        assert_eq!(key, "agent:a1:peer:x:acc:u1");
    }

    #[test]
    fn round_trip_peer() {
        let scope = SessionScope::Peer {
            channel: "discord".into(),
            account: "acct1".into(),
            peer: "alice".into(),
        };
        let key = build_session_key("bot1", &scope);
        assert_eq!(parse_session_key(&key).unwrap(), ("bot1".to_string(), scope));
    }

    #[test]
    fn round_trip_group_without_peer() {
        let scope = SessionScope::Group {
            channel: "discord".into(),
            account: "acct1".into(),
            group: "server42".into(),
            peer: None,
        };
        let key = build_session_key("bot1", &scope);
        assert_eq!(parse_session_key(&key).unwrap(), ("bot1".to_string(), scope));
    }

    #[test]
    fn round_trip_group_with_peer() {
        let scope = SessionScope::Group {
            channel: "discord".into(),
            account: "acct1".into(),
            group: "server42".into(),
            peer: Some("thread99".into()),
        };
        let key = build_session_key("bot1", &scope);
        assert_eq!(parse_session_key(&key).unwrap(), ("bot1".to_string(), scope));
    }

    #[test]
    fn round_trip_main_thread() {
        let scope = SessionScope::MainThread {
            thread_id: "t-1".into(),
        };
        let key = build_session_key("bot1", &scope);
        assert_eq!(key, "agent:bot1:main:thread:t-1");
        assert_eq!(parse_session_key(&key).unwrap(), ("bot1".to_string(), scope));
    }

    #[test]
    fn round_trip_main_topic() {
        let scope = SessionScope::MainTopic {
            topic_id: "topic-7".into(),
        };
        let key = build_session_key("bot1", &scope);
        assert_eq!(key, "agent:bot1:main:topic:topic-7");
        assert_eq!(parse_session_key(&key).unwrap(), ("bot1".to_string(), scope));
    }

    #[test]
    fn round_trip_subagent() {
        let scope = SessionScope::Subagent {
            parent: "agent:bot1:peer:discord:acct1:alice".into(),
            subagent_id: "child1".into(),
        };
        let key = build_session_key("bot1", &scope);
        assert_eq!(
            key,
            "agent:bot1:subagent:agent:bot1:peer:discord:acct1:alice:child1"
        );
        assert_eq!(parse_session_key(&key).unwrap(), ("bot1".to_string(), scope));
    }

    #[test]
    fn parse_rejects_missing_prefix() {
        assert_eq!(
            parse_session_key("bot1:peer:x:y:z"),
            Err(SessionKeyError::MissingAgentPrefix)
        );
    }

    #[test]
    fn parse_rejects_unknown_scope() {
        assert_eq!(
            parse_session_key("agent:bot1:channel:x:y"),
            Err(SessionKeyError::UnknownScope("channel".to_string()))
        );
    }

    #[test]
    fn parse_rejects_incomplete_peer() {
        assert_eq!(
            parse_session_key("agent:bot1:peer:x"),
            Err(SessionKeyError::Malformed {
                scope: "peer",
                expected: 3
            })
        );
    }

    #[test]
    fn resolve_scope_direct_message() {
        let scope = resolve_scope(&meta("discord", "alice", true));
        assert_eq!(
            scope,
            SessionScope::Peer {
                channel: "discord".into(),
                account: "default".into(),
                peer: "alice".into(),
            }
        );
    }

    #[test]
    fn resolve_scope_group_message() {
        let m = InboundMetadata {
            channel: Some("discord".into()),
            group_id: Some("server42".into()),
            is_direct: false,
            ..Default::default()
        };
        let scope = resolve_scope(&m);
        assert_eq!(
            scope,
            SessionScope::Group {
                channel: "discord".into(),
                account: "default".into(),
                group: "server42".into(),
                peer: None,
            }
        );
    }

    #[test]
    fn compute_session_key_is_deterministic() {
        let m = meta("discord", "alice", true);
        assert_eq!(compute_session_key("bot1", &m), compute_session_key("bot1", &m));
    }

    #[test]
    fn validate_metadata_requires_peer_for_direct() {
        let m = InboundMetadata {
            channel: Some("discord".into()),
            is_direct: true,
            ..Default::default()
        };
        let v = validate_metadata(&m);
        assert!(!v.is_ok());
    }

    #[test]
    fn validate_metadata_requires_group_or_channel_for_group() {
        let m = InboundMetadata {
            channel: Some("discord".into()),
            is_direct: false,
            ..Default::default()
        };
        let v = validate_metadata(&m);
        assert!(!v.is_ok());
    }

    #[test]
    fn validate_metadata_accepts_well_formed_direct() {
        let v = validate_metadata(&meta("discord", "alice", true));
        assert!(v.is_ok());
    }

    #[test]
    fn validate_metadata_warns_on_missing_account_id() {
        let v = validate_metadata(&meta("discord", "alice", true));
        assert!(v.is_ok());
        assert!(!v.warnings.is_empty());
    }
}
