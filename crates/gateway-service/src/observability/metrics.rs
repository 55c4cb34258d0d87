//! Metrics definitions for the gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gw_` prefix for the gateway
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `outcome`: small fixed set per metric (success/error, allowed/denied)
//! - `source`: 2 values (cache, fresh)
//! - `reason`: bounded by the error taxonomy

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record a token validation outcome.
///
/// Metric: `gw_token_validations_total`
/// Labels: `outcome` (valid, invalid, revoked, disabled), `source` (cache, fresh)
pub fn record_token_validation(outcome: &str, source: &str) {
    counter!("gw_token_validations_total", "outcome" => outcome.to_string(), "source" => source.to_string())
        .increment(1);
}

/// Update the validation cache size gauge.
///
/// Metric: `gw_validation_cache_entries`
pub fn set_validation_cache_size(entries: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("gw_validation_cache_entries").set(entries as f64);
}

/// Record a revocation-store hit (a revoked token was presented).
///
/// Metric: `gw_revoked_token_attempts_total`
pub fn record_revoked_token_attempt() {
    counter!("gw_revoked_token_attempts_total").increment(1);
}

// ============================================================================
// Login / Synchronization Metrics
// ============================================================================

/// Record a login callback outcome.
///
/// Metric: `gw_logins_total`
/// Labels: `outcome` (success, disabled, code_expired, error)
pub fn record_login(outcome: &str) {
    counter!("gw_logins_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a user synchronization run.
///
/// Metric: `gw_user_sync_duration_seconds` / `gw_user_sync_total`
/// Labels: `outcome` (success, error)
pub fn record_user_sync(outcome: &str, duration: Duration) {
    histogram!("gw_user_sync_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());

    counter!("gw_user_sync_total", "outcome" => outcome.to_string()).increment(1);
}

// ============================================================================
// Permission Metrics
// ============================================================================

/// Record a permission-check decision.
///
/// Metric: `gw_permission_checks_total`
/// Labels: `outcome` (allowed, denied)
pub fn record_permission_check(allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    counter!("gw_permission_checks_total", "outcome" => outcome.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_helpers_do_not_panic_without_recorder() {
        // With no global recorder installed these are no-ops; they must
        // never panic on the request path.
        record_token_validation("valid", "cache");
        set_validation_cache_size(3);
        record_revoked_token_attempt();
        record_login("success");
        record_user_sync("success", Duration::from_millis(12));
        record_permission_check(true);
        record_permission_check(false);
    }
}
