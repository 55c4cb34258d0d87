//! Token validation cache.
//!
//! Maps a bearer token string to its previously validated claim set for a
//! bounded time, so a burst of requests with the same token costs one
//! signature verification instead of hundreds.
//!
//! # Concurrency
//!
//! Many readers, occasional writers: reads take the shared lock, writes
//! (insert, delete, bulk clear) take the exclusive lock. Lock scope is
//! limited to the map access itself and is never held across I/O. A
//! poisoned lock is recovered rather than propagated - cache state is
//! advisory, a panicking writer must not take the service down.
//!
//! # Staleness
//!
//! Every entry gets the same fixed TTL regardless of the token's own
//! expiry. This bounds how stale the downstream account-active check can
//! get independent of token lifetime. When the map grows past
//! [`SWEEP_THRESHOLD`] entries, an expired-entry sweep runs synchronously
//! inside the writer critical section before the insert - amortized
//! cleanup with no background thread.

use crate::auth::claims::Claims;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Fixed TTL for cached validations (5 minutes).
pub const DEFAULT_VALIDATION_TTL: Duration = Duration::from_secs(300);

/// Entry count past which an insert sweeps expired entries first.
pub const SWEEP_THRESHOLD: usize = 1000;

/// A cached validation result. Entries are never partially updated -
/// replaced wholesale on re-validation.
struct CachedValidation {
    claims: Claims,
    expires_at: Instant,
}

/// Concurrency-safe, self-evicting token validation cache.
pub struct ValidationCache {
    entries: RwLock<HashMap<String, CachedValidation>>,
    ttl: Duration,
}

impl Default for ValidationCache {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDATION_TTL)
    }
}

impl ValidationCache {
    /// Create a cache with the given entry TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, HashMap<String, CachedValidation>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, HashMap<String, CachedValidation>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a token's cached claims.
    ///
    /// Expired entries are removed lazily here: visible only while
    /// `now < expiry`.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<Claims> {
        self.get_at(token, Instant::now())
    }

    /// Deterministic lookup against an explicit `now` (for boundary tests).
    fn get_at(&self, token: &str, now: Instant) -> Option<Claims> {
        {
            let entries = self.read_lock();
            match entries.get(token) {
                Some(entry) if now < entry.expires_at => return Some(entry.claims.clone()),
                Some(_) => {} // expired - fall through to remove
                None => return None,
            }
        }

        // Entry was expired: upgrade to the write lock and remove it,
        // re-checking expiry in case a writer refreshed it in between.
        let mut entries = self.write_lock();
        if let Some(entry) = entries.get(token) {
            if now < entry.expires_at {
                return Some(entry.claims.clone());
            }
            entries.remove(token);
        }
        None
    }

    /// Cache a validated claim set for this token.
    pub fn put(&self, token: &str, claims: Claims) {
        self.put_at(token, claims, Instant::now());
    }

    fn put_at(&self, token: &str, claims: Claims, now: Instant) {
        let mut entries = self.write_lock();

        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, entry| now < entry.expires_at);
        }

        entries.insert(
            token.to_string(),
            CachedValidation {
                claims,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop a single token's entry.
    ///
    /// Called when the account-active check discovers a now-disabled
    /// account, so the next request re-validates from source instead of
    /// serving a stale "allowed" decision.
    pub fn invalidate(&self, token: &str) {
        let mut entries = self.write_lock();
        if entries.remove(token).is_some() {
            tracing::debug!(target: "gw.auth.cache", "Token removed from validation cache");
        }
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        let mut entries = self.write_lock();
        let count = entries.len();
        entries.clear();
        tracing::info!(
            target: "gw.auth.cache",
            entries_cleared = count,
            "Validation cache cleared"
        );
    }

    /// Current entry count (includes not-yet-swept expired entries).
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

    fn claims(sub: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: 2_000_000_000,
            iat: 1_700_000_000,
            email: None,
            name: None,
            groups: None,
            organization: None,
        }
    }

    #[test]
    fn test_get_returns_cached_claims_until_ttl() {
        let cache = ValidationCache::new(Duration::from_secs(300));
        let now = Instant::now();

        cache.put_at("token-a", claims("u1"), now);

        // Visible just before expiry
        let hit = cache.get_at("token-a", now + Duration::from_secs(299));
        assert_eq!(hit.unwrap().sub, "u1");

        // Gone at expiry
        assert!(cache.get_at("token-a", now + Duration::from_secs(300)).is_none());
    }

    #[test]
    fn test_expired_entry_is_removed_lazily() {
        let cache = ValidationCache::new(Duration::from_secs(10));
        let now = Instant::now();

        cache.put_at("token-a", claims("u1"), now);
        assert_eq!(cache.len(), 1);

        assert!(cache.get_at("token-a", now + Duration::from_secs(11)).is_none());
        assert_eq!(cache.len(), 0, "expired entry removed on lookup");
    }

    #[test]
    fn test_unknown_token_misses() {
        let cache = ValidationCache::default();
        assert!(cache.get("never-seen").is_none());
    }

    #[test]
    fn test_put_replaces_wholesale() {
        let cache = ValidationCache::new(Duration::from_secs(300));
        let now = Instant::now();

        cache.put_at("token-a", claims("u1"), now);
        cache.put_at("token-a", claims("u2"), now);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("token-a", now).unwrap().sub, "u2");
    }

    #[test]
    fn test_invalidate_single_token() {
        let cache = ValidationCache::new(Duration::from_secs(300));
        let now = Instant::now();

        cache.put_at("token-a", claims("u1"), now);
        cache.put_at("token-b", claims("u2"), now);

        cache.invalidate("token-a");

        assert!(cache.get_at("token-a", now).is_none());
        assert_eq!(cache.get_at("token-b", now).unwrap().sub, "u2");
    }

    #[test]
    fn test_invalidate_all() {
        let cache = ValidationCache::new(Duration::from_secs(300));
        let now = Instant::now();

        cache.put_at("token-a", claims("u1"), now);
        cache.put_at("token-b", claims("u2"), now);

        cache.invalidate_all();

        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_runs_at_threshold_before_insert() {
        let cache = ValidationCache::new(Duration::from_secs(10));
        let now = Instant::now();

        // Fill up to the threshold with entries that will be expired later
        for i in 0..SWEEP_THRESHOLD {
            cache.put_at(&format!("token-{i}"), claims("u"), now);
        }
        assert_eq!(cache.len(), SWEEP_THRESHOLD);

        // All previous entries have expired by now + 11s; the next insert
        // sweeps them inside the writer critical section.
        let later = now + Duration::from_secs(11);
        cache.put_at("fresh-token", claims("u-fresh"), later);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("fresh-token", later).unwrap().sub, "u-fresh");
    }

    #[test]
    fn test_sweep_keeps_unexpired_entries() {
        let cache = ValidationCache::new(Duration::from_secs(300));
        let now = Instant::now();

        for i in 0..SWEEP_THRESHOLD {
            cache.put_at(&format!("token-{i}"), claims("u"), now);
        }

        // Entries still live: sweep removes nothing, insert proceeds
        cache.put_at("fresh-token", claims("u-fresh"), now + Duration::from_secs(1));
        assert_eq!(cache.len(), SWEEP_THRESHOLD + 1);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        use std::sync::Arc;

        let cache = Arc::new(ValidationCache::new(Duration::from_secs(300)));
        let mut handles = Vec::new();

        for t in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let token = format!("token-{}-{}", t, i);
                    cache.put(&token, claims("u"));
                    assert!(cache.get(&token).is_some());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 800);
    }
}
