//! Auth-Profile Pool: credential rotation per provider with cooldown
//! durations that depend on the error class that last hit a profile.
//!
//! [`AuthProfilePool`] holds one or more resolved credentials ("profiles")
//! for a provider and hands out a live one via [`AuthProfilePool::select`].
//! A failed call reports its [`ErrorClass`] through
//! [`AuthProfilePool::record_failure`], which computes the next
//! `cooldown_until`/`disabled_until` for that profile. A successful call
//! resets the profile's failure streak via [`AuthProfilePool::record_success`].
//!
//! Thread-safe (`Send + Sync`); share behind an `Arc`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sa_domain::config::AuthConfig;
use sa_domain::error::{Error, Result};

/// Classification of a provider call failure, driving the cooldown formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limit, timeout, or an unrecognized transient failure.
    Transient,
    /// Billing/quota exhaustion.
    Billing,
    /// Bad credentials or a malformed request the key can't satisfy.
    Auth,
}

/// `(provider, credential, state)` — one rotation slot.
struct Profile {
    credential: String,
    last_used: Option<DateTime<Utc>>,
    error_count: u32,
    cooldown_until: Option<DateTime<Utc>>,
    disabled_until: Option<DateTime<Utc>>,
    last_error_class: Option<ErrorClass>,
}

impl Profile {
    fn new(credential: String) -> Self {
        Self {
            credential,
            last_used: None,
            error_count: 0,
            cooldown_until: None,
            disabled_until: None,
            last_error_class: None,
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.disabled_until.map(|d| d <= now).unwrap_or(true)
            && self.cooldown_until.map(|c| c <= now).unwrap_or(true)
    }
}

/// Transient cooldown: `min(1h, 60s * 5^min(error_count-1, 3))`, i.e.
/// 1, 5, 25, 60 minutes for consecutive failures 1..=4+.
fn transient_cooldown(error_count: u32) -> chrono::Duration {
    let exp = error_count.saturating_sub(1).min(3);
    let secs = 60u64.saturating_mul(5u64.saturating_pow(exp));
    chrono::Duration::seconds(secs.min(3600) as i64)
}

/// Billing cooldown: base 5h, doubling per consecutive billing failure, up
/// to a 24h cap.
fn billing_cooldown(error_count: u32) -> chrono::Duration {
    let exp = error_count.saturating_sub(1).min(3); // 5h * 2^3 = 40h > 24h cap anyway
    let hours = (5u64.saturating_mul(1u64 << exp)).min(24);
    chrono::Duration::hours(hours as i64)
}

/// Thread-safe round-robin Auth-Profile Pool for a single provider.
pub struct AuthProfilePool {
    profiles: Mutex<Vec<Profile>>,
}

impl AuthProfilePool {
    fn new(credentials: Vec<String>) -> Result<Self> {
        if credentials.is_empty() {
            return Err(Error::Auth(
                "AuthProfilePool requires at least one resolved credential".into(),
            ));
        }
        Ok(Self {
            profiles: Mutex::new(credentials.into_iter().map(Profile::new).collect()),
        })
    }

    /// Build a pool from an [`AuthConfig`].
    ///
    /// Resolution order:
    /// 1. If `auth.keys` is non-empty, resolve each env var name and use those.
    /// 2. Else fall back to single `auth.key` (direct) or `auth.env` (env var).
    pub fn from_auth_config(auth: &AuthConfig) -> Result<Self> {
        let resolved = if !auth.keys.is_empty() {
            let mut resolved_keys = Vec::with_capacity(auth.keys.len());
            for env_name in &auth.keys {
                match std::env::var(env_name) {
                    Ok(val) if !val.is_empty() => resolved_keys.push(val),
                    _ => {
                        return Err(Error::Auth(format!(
                            "environment variable '{}' not set or empty (from auth.keys list)",
                            env_name
                        )));
                    }
                }
            }
            resolved_keys
        } else {
            vec![crate::util::resolve_api_key(auth)?]
        };

        Self::new(resolved)
    }

    /// Select a live profile: lowest `cooldown_until`/`disabled_until`-
    /// cleared, least-recently-used, tie-broken by lowest `error_count`.
    /// Returns `Error::ProviderUnavailable` when every profile is
    /// cooling down or permanently disabled.
    pub fn select(&self) -> Result<AuthProfileHandle> {
        let mut profiles = self.profiles.lock();
        let now = Utc::now();

        let idx = profiles
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_live(now))
            .min_by(|(_, a), (_, b)| {
                a.last_used
                    .cmp(&b.last_used)
                    .then(a.error_count.cmp(&b.error_count))
            })
            .map(|(i, _)| i)
            .ok_or_else(|| {
                Error::ProviderUnavailable(
                    "every auth profile is cooling down or disabled".into(),
                )
            })?;

        profiles[idx].last_used = Some(now);
        Ok(AuthProfileHandle {
            index: idx,
            credential: profiles[idx].credential.clone(),
        })
    }

    /// Record a successful call: resets the profile's failure streak.
    pub fn record_success(&self, index: usize) {
        let mut profiles = self.profiles.lock();
        if let Some(p) = profiles.get_mut(index) {
            p.error_count = 0;
            p.cooldown_until = None;
            p.last_error_class = None;
        }
    }

    /// Record a failed call, computing the new cooldown/disablement for
    /// that profile per its [`ErrorClass`].
    pub fn record_failure(&self, index: usize, class: ErrorClass) {
        let mut profiles = self.profiles.lock();
        let Some(p) = profiles.get_mut(index) else {
            return;
        };
        let now = Utc::now();
        p.error_count = p.error_count.saturating_add(1);
        p.last_error_class = Some(class);

        match class {
            ErrorClass::Transient => {
                p.cooldown_until = Some(now + transient_cooldown(p.error_count));
            }
            ErrorClass::Billing => {
                p.cooldown_until = Some(now + billing_cooldown(p.error_count));
            }
            ErrorClass::Auth => {
                p.disabled_until = Some(DateTime::<Utc>::MAX_UTC);
            }
        }

        tracing::warn!(
            profile_index = index,
            error_count = p.error_count,
            error_class = ?class,
            cooldown_until = ?p.cooldown_until,
            disabled_until = ?p.disabled_until,
            "auth profile recorded failure"
        );
    }

    /// Number of profiles in the pool.
    pub fn len(&self) -> usize {
        self.profiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AuthProfilePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProfilePool")
            .field("profile_count", &self.profiles.lock().len())
            .finish()
    }
}

/// A credential handed out by [`AuthProfilePool::select`]. Callers hold
/// `index` to report success/failure back to the pool.
#[derive(Debug, Clone)]
pub struct AuthProfileHandle {
    pub index: usize,
    pub credential: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_profile_always_selected() {
        let pool = AuthProfilePool::new(vec!["key-a".into()]).unwrap();
        assert_eq!(pool.select().unwrap().credential, "key-a");
        assert_eq!(pool.select().unwrap().credential, "key-a");
    }

    #[test]
    fn least_recently_used_is_preferred() {
        let pool = AuthProfilePool::new(vec!["a".into(), "b".into()]).unwrap();
        let first = pool.select().unwrap();
        assert_eq!(first.index, 0); // both unused, tie -> first by order
        let second = pool.select().unwrap();
        assert_eq!(second.index, 1); // now a.last_used is newest, b preferred
    }

    #[test]
    fn transient_failure_enters_cooldown_and_recovers() {
        let pool = AuthProfilePool::new(vec!["a".into(), "b".into()]).unwrap();
        let a = pool.select().unwrap();
        assert_eq!(a.index, 0);
        pool.record_failure(0, ErrorClass::Transient);

        // "a" is in cooldown; next selection must be "b".
        let b = pool.select().unwrap();
        assert_eq!(b.index, 1);
    }

    #[test]
    fn all_profiles_cooling_down_returns_provider_unavailable() {
        let pool = AuthProfilePool::new(vec!["a".into()]).unwrap();
        pool.select().unwrap();
        pool.record_failure(0, ErrorClass::Transient);
        let err = pool.select().unwrap_err();
        assert_eq!(err.rpc_code(), "provider_unavailable");
    }

    #[test]
    fn auth_failure_disables_profile_indefinitely() {
        let pool = AuthProfilePool::new(vec!["a".into(), "b".into()]).unwrap();
        pool.select().unwrap();
        pool.record_failure(0, ErrorClass::Auth);
        let sel = pool.select().unwrap();
        assert_eq!(sel.index, 1);
        // "a" stays disabled even after another round.
        pool.record_success(1);
        let sel = pool.select().unwrap();
        assert_eq!(sel.index, 1);
    }

    #[test]
    fn success_resets_error_count_and_cooldown() {
        let pool = AuthProfilePool::new(vec!["a".into()]).unwrap();
        pool.select().unwrap();
        pool.record_failure(0, ErrorClass::Transient);
        pool.record_success(0);
        // No longer in cooldown: selectable immediately.
        assert!(pool.select().is_ok());
    }

    #[test]
    fn transient_cooldown_escalates_then_caps_at_one_hour() {
        assert_eq!(transient_cooldown(1), chrono::Duration::minutes(1));
        assert_eq!(transient_cooldown(2), chrono::Duration::minutes(5));
        assert_eq!(transient_cooldown(3), chrono::Duration::minutes(25));
        assert_eq!(transient_cooldown(4), chrono::Duration::minutes(60));
        assert_eq!(transient_cooldown(10), chrono::Duration::minutes(60));
    }

    #[test]
    fn billing_cooldown_doubles_then_caps_at_24h() {
        assert_eq!(billing_cooldown(1), chrono::Duration::hours(5));
        assert_eq!(billing_cooldown(2), chrono::Duration::hours(10));
        assert_eq!(billing_cooldown(3), chrono::Duration::hours(20));
        assert_eq!(billing_cooldown(4), chrono::Duration::hours(24));
        assert_eq!(billing_cooldown(10), chrono::Duration::hours(24));
    }

    #[test]
    fn empty_credentials_returns_error() {
        assert!(AuthProfilePool::new(vec![]).is_err());
    }

    #[test]
    fn from_auth_config_single_key() {
        let auth = AuthConfig {
            key: Some("direct-key".into()),
            ..AuthConfig::default()
        };
        let pool = AuthProfilePool::from_auth_config(&auth).unwrap();
        assert_eq!(pool.select().unwrap().credential, "direct-key");
        assert_eq!(pool.len(), 1);
    }
}
