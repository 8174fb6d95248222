//! Method scopes and role resolution.
//!
//! Tokens carry `read | write | approvals | pairing | admin`; `admin`
//! implies all the others. Mirrors the dual-bearer-token model already
//! used by the HTTP surface (`api/auth.rs`'s `SA_API_TOKEN`,
//! `api/admin/guard.rs`'s `SA_ADMIN_TOKEN`) rather than inventing a third
//! credential shape — the admin token maps to `Role::Admin`, the regular
//! API token to `Role::ReadWrite` (read + write + approvals, no pairing).
//! There is currently no token tier narrower than that, so a caller who
//! needs a genuinely read-only or pairing-only connection has to mint a
//! dedicated token and register it with [`Role::Scoped`].

use std::collections::HashSet;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Read,
    Write,
    Approvals,
    Pairing,
    Admin,
}

/// Required scope for each method this dispatcher implements. `None` means
/// the method is unknown (dispatch returns `not_found`).
pub fn required_scope(method: &str) -> Option<Scope> {
    match method {
        // Session: listing/inspecting is read, mutating is write.
        "sessions.list" | "sessions.preview" | "sessions.resolve" => Some(Scope::Read),
        "sessions.patch" | "sessions.delete" | "sessions.reset" | "sessions.compact" => {
            Some(Scope::Write)
        }

        // Chat: sending/aborting/injecting mutate a session's transcript.
        "chat.history" => Some(Scope::Read),
        "chat.send" | "chat.abort" | "chat.inject" => Some(Scope::Write),

        // Agent: starting a run is a write; waiting/identity are read-only.
        "agent" => Some(Scope::Write),
        "agent.wait" | "agent.identity" => Some(Scope::Read),

        "channels.status" => Some(Scope::Read),
        "channels.logout" => Some(Scope::Write),

        "config.get" | "config.schema" => Some(Scope::Read),
        "config.set" | "config.patch" | "config.apply" => Some(Scope::Write),

        "cron.list" => Some(Scope::Read),
        "cron.add" | "cron.update" | "cron.remove" | "cron.run" => Some(Scope::Write),

        "models.list" | "skills.status" => Some(Scope::Read),

        "nodes.list" | "nodes.describe" => Some(Scope::Read),
        "nodes.invoke" => Some(Scope::Write),
        "nodes.pair.request" | "nodes.pair.approve" | "nodes.pair.revoke" => {
            Some(Scope::Pairing)
        }

        "tools.approvals.list" => Some(Scope::Read),
        "tools.approvals.approve" | "tools.approvals.deny" => Some(Scope::Approvals),

        "health" => Some(Scope::Read),
        "logs.tail" => Some(Scope::Read),
        _ => None,
    }
}

/// Caller identity as resolved from the `hello.auth.token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// `SA_ADMIN_TOKEN` bearer — every scope.
    Admin,
    /// `SA_API_TOKEN` bearer — `read`, `write`, `approvals`, no `pairing`.
    ReadWrite,
    /// An explicit, narrower grant — used for tokens minted for a single
    /// purpose (e.g. a pairing-only companion flow) rather than the two
    /// blanket tokens above.
    Scoped(HashSet<Scope>),
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::ReadWrite => "operator",
            Role::Scoped(_) => "scoped",
        }
    }

    pub fn scopes(&self) -> Vec<Scope> {
        match self {
            Role::Admin => vec![
                Scope::Read,
                Scope::Write,
                Scope::Approvals,
                Scope::Pairing,
                Scope::Admin,
            ],
            Role::ReadWrite => vec![Scope::Read, Scope::Write, Scope::Approvals],
            Role::Scoped(scopes) => scopes.iter().copied().collect(),
        }
    }

    pub fn has(&self, scope: Scope) -> bool {
        match self {
            Role::Admin => true,
            Role::ReadWrite => matches!(scope, Scope::Read | Scope::Write | Scope::Approvals),
            Role::Scoped(scopes) => scopes.contains(&scope),
        }
    }
}

/// Resolve a role from the bearer token carried in `hello.auth.token`,
/// using the same SHA-256 + constant-time comparison as the HTTP guards.
///
/// An unconfigured token (dev mode, matching `AdminGuard`/`require_api_token`)
/// is treated as satisfied by anyone — consistent with the HTTP surface's
/// own dev-mode behavior rather than a stricter RPC-only policy. When both
/// tokens are configured and the provided token matches neither, there is
/// no fallback: the connection is unauthorized, so a caller genuinely
/// lacking `write`/`approvals`/`pairing` has no way to forge them.
pub fn resolve_role(
    token: Option<&str>,
    api_token_hash: &Option<Vec<u8>>,
    admin_token_hash: &Option<Vec<u8>>,
) -> Option<Role> {
    use sha2::{Digest, Sha256};
    use subtle::ConstantTimeEq;

    let matches = |expected: &Option<Vec<u8>>| -> bool {
        match expected {
            None => true,
            Some(hash) => {
                let provided = token.unwrap_or("");
                let provided_hash = Sha256::digest(provided.as_bytes());
                bool::from(provided_hash.ct_eq(hash.as_slice()))
            }
        }
    };

    if matches(admin_token_hash) {
        return Some(Role::Admin);
    }
    if matches(api_token_hash) {
        return Some(Role::ReadWrite);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_role_lacks_pairing_and_admin() {
        let role = Role::ReadWrite;
        assert!(role.has(Scope::Read));
        assert!(role.has(Scope::Write));
        assert!(role.has(Scope::Approvals));
        assert!(!role.has(Scope::Pairing));
        assert!(!role.has(Scope::Admin));
    }

    #[test]
    fn scoped_role_only_has_its_grants() {
        let role = Role::Scoped([Scope::Read].into_iter().collect());
        assert!(role.has(Scope::Read));
        assert!(!role.has(Scope::Write));
        assert!(!role.has(Scope::Pairing));
    }

    #[test]
    fn admin_has_every_scope() {
        let role = Role::Admin;
        for scope in [
            Scope::Read,
            Scope::Write,
            Scope::Approvals,
            Scope::Pairing,
            Scope::Admin,
        ] {
            assert!(role.has(scope));
        }
    }

    #[test]
    fn every_declared_method_maps_to_a_scope() {
        for method in super::ws::METHODS {
            assert!(
                required_scope(method).is_some(),
                "method {method} advertised in hello_ok but has no required_scope mapping"
            );
        }
    }
}
