//! Token revocation store.
//!
//! A set of tokens explicitly invalidated before their natural expiry
//! (forced logout, account disablement detected out-of-band). Entries
//! carry the token's own expiry timestamp so the set cannot grow
//! unboundedly: once a token would have expired anyway there is nothing
//! left to revoke.
//!
//! A token present here fails authentication unconditionally - revocation
//! always wins over a cached or freshly validated "valid" result.
//!
//! Same locking discipline as the validation cache: shared reads,
//! exclusive writes, lock scope limited to the map access.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Concurrency-safe revocation set with expiry-based cleanup.
#[derive(Default)]
pub struct RevocationStore {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl RevocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Revoke a token until its natural expiry.
    pub fn add(&self, token: &str, expires_at: DateTime<Utc>) {
        let mut entries = self.write_lock();
        entries.insert(token.to_string(), expires_at);
        tracing::info!(
            target: "gw.auth.revocation",
            expires_at = %expires_at,
            "Token added to revocation store"
        );
    }

    /// Whether a token is currently revoked.
    ///
    /// Entries past their expiry are removed lazily and report `false`.
    #[must_use]
    pub fn is_revoked(&self, token: &str) -> bool {
        self.is_revoked_at(token, Utc::now())
    }

    /// Deterministic check against an explicit `now` (for boundary tests).
    fn is_revoked_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        {
            let entries = self.read_lock();
            match entries.get(token) {
                Some(expires_at) if now < *expires_at => return true,
                Some(_) => {} // expired - fall through to remove
                None => return false,
            }
        }

        let mut entries = self.write_lock();
        if let Some(expires_at) = entries.get(token) {
            if now < *expires_at {
                return true;
            }
            entries.remove(token);
        }
        false
    }

    /// Remove every entry past its expiry.
    pub fn cleanup(&self) {
        self.cleanup_at(Utc::now());
    }

    fn cleanup_at(&self, now: DateTime<Utc>) {
        let mut entries = self.write_lock();
        let before = entries.len();
        entries.retain(|_, expires_at| now < *expires_at);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(
                target: "gw.auth.revocation",
                removed = removed,
                "Expired revocation entries cleaned up"
            );
        }
    }

    /// Current entry count (includes not-yet-cleaned expired entries).
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_revoked_before_expiry_clear_after() {
        let store = RevocationStore::new();
        let now = Utc::now();
        let expiry = now + Duration::hours(1);

        store.add("token-a", expiry);

        assert!(store.is_revoked_at("token-a", now));
        assert!(store.is_revoked_at("token-a", expiry - Duration::seconds(1)));
        assert!(!store.is_revoked_at("token-a", expiry));
        assert!(!store.is_revoked_at("token-a", expiry + Duration::seconds(1)));
    }

    #[test]
    fn test_unknown_token_is_not_revoked() {
        let store = RevocationStore::new();
        assert!(!store.is_revoked("never-seen"));
    }

    #[test]
    fn test_expired_entry_removed_lazily() {
        let store = RevocationStore::new();
        let now = Utc::now();

        store.add("token-a", now + Duration::seconds(10));
        assert_eq!(store.len(), 1);

        assert!(!store.is_revoked_at("token-a", now + Duration::seconds(11)));
        assert_eq!(store.len(), 0, "expired entry removed on lookup");
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let store = RevocationStore::new();
        let now = Utc::now();

        store.add("expired-1", now - Duration::seconds(5));
        store.add("expired-2", now - Duration::hours(2));
        store.add("live", now + Duration::hours(1));

        store.cleanup_at(now);

        assert_eq!(store.len(), 1);
        assert!(store.is_revoked_at("live", now));
    }

    #[test]
    fn test_revocation_wins_until_expiry_even_after_re_add() {
        let store = RevocationStore::new();
        let now = Utc::now();

        store.add("token-a", now + Duration::seconds(30));
        store.add("token-a", now + Duration::hours(1)); // replace with later expiry

        assert!(store.is_revoked_at("token-a", now + Duration::minutes(30)));
    }
}
