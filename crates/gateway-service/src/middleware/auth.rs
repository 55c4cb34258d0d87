//! Authentication middleware for protected routes.
//!
//! Per-request pipeline: extract the bearer token (Authorization header,
//! else the auth cookie; header wins) -> validation cache -> signature
//! validator (cache fill on miss) -> revocation check (revocation always
//! wins) -> principal propagation -> account-active gate.
//!
//! The account-active gate re-checks the employee record on every request,
//! cached or not; a successful lookup with `active = false` denies with
//! 403 and invalidates the token's cache entry so the next request
//! re-validates from source. A failed lookup is tolerated (employees not
//! yet synchronized).

use crate::auth::cache::ValidationCache;
use crate::auth::claims::Principal;
use crate::auth::jwt::JwtValidator;
use crate::auth::revocation::RevocationStore;
use crate::config::AUTH_COOKIE_NAME;
use crate::errors::GatewayError;
use crate::observability::metrics;
use crate::repositories::employees;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Database pool for the account-active gate.
    pub pool: PgPool,

    /// JWT validator with JWKS client.
    pub validator: Arc<JwtValidator>,

    /// Validation cache shared with the logout handler.
    pub cache: Arc<ValidationCache>,

    /// Revocation store shared with the logout handler.
    pub revocations: Arc<RevocationStore>,
}

/// The bearer token a request authenticated with, kept for handlers that
/// need to act on the token itself (logout revokes it).
#[derive(Clone)]
pub struct AuthenticatedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AuthenticatedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Where the request carried its token (for diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Header,
    Cookie,
}

impl TokenSource {
    fn as_str(self) -> &'static str {
        match self {
            TokenSource::Header => "header",
            TokenSource::Cookie => "cookie",
        }
    }
}

/// Extract the bearer token from the Authorization header, falling back
/// to the auth cookie. The header takes precedence.
pub fn extract_token(headers: &HeaderMap) -> Option<(String, TokenSource)> {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
    {
        return Some((token.to_string(), TokenSource::Header));
    }

    let cookie_header = headers.get("cookie").and_then(|h| h.to_str().ok())?;
    for pair in cookie_header.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            if name == AUTH_COOKIE_NAME && !value.is_empty() {
                return Some((value.to_string(), TokenSource::Cookie));
            }
        }
    }

    None
}

/// Authentication middleware that validates bearer tokens.
///
/// On success the request carries a [`Principal`] and an
/// [`AuthenticatedToken`] in its extensions, replacing any prior values.
#[instrument(skip_all, name = "gw.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, GatewayError> {
    let (token, source) = extract_token(req.headers()).ok_or_else(|| {
        tracing::debug!(target: "gw.middleware.auth", "No bearer token in header or cookie");
        GatewayError::Unauthenticated
    })?;

    // Cache first, validator as fallback; the cache TTL bounds how stale
    // the account-active decision below can get.
    let (claims, validation_source) = match state.cache.get(&token) {
        Some(claims) => (claims, "cache"),
        None => {
            let claims = state.validator.validate(&token).await.map_err(|e| {
                metrics::record_token_validation("invalid", "fresh");
                tracing::debug!(
                    target: "gw.middleware.auth",
                    error = %e,
                    token_source = source.as_str(),
                    "Token validation failed"
                );
                GatewayError::from(e)
            })?;
            state.cache.put(&token, claims.clone());
            (claims, "fresh")
        }
    };

    // Revocation always wins over a cached or freshly validated result.
    if state.revocations.is_revoked(&token) {
        metrics::record_revoked_token_attempt();
        tracing::warn!(target: "gw.middleware.auth", "Revoked token presented");
        return Err(GatewayError::Revoked);
    }

    metrics::record_token_validation("valid", validation_source);
    metrics::set_validation_cache_size(state.cache.len());

    let principal = Principal::from_claims(&claims);
    let expires_at = DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);

    // Account-active gate: a disabled account is denied even with a
    // cache-fresh, cryptographically valid token.
    match employees::find_current_user_info(&state.pool, &principal.user_id).await {
        Ok(Some(employee)) if !employee.active => {
            state.cache.invalidate(&token);
            metrics::record_token_validation("disabled", validation_source);
            tracing::warn!(
                target: "gw.middleware.auth",
                employee_id = %employee.employee_id,
                "Disabled account denied access, cache entry invalidated"
            );
            return Err(GatewayError::AccountDisabled);
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            tracing::debug!(
                target: "gw.middleware.auth",
                "No employee record yet, proceeding (first login not synchronized)"
            );
        }
        Err(e) => {
            // Non-fatal: the status lookup degrades, it never crashes the
            // request path.
            tracing::warn!(
                target: "gw.middleware.auth",
                error = %e,
                "Employee status lookup failed, proceeding"
            );
        }
    }

    req.extensions_mut().insert(principal);
    req.extensions_mut().insert(AuthenticatedToken { token, expires_at });

    Ok(next.run(req).await)
}

/// Extension trait for extracting the principal from a request.
pub trait PrincipalExt {
    /// Get the authenticated principal from request extensions.
    ///
    /// Returns `None` if the auth middleware was not applied.
    fn principal(&self) -> Option<&Principal>;
}

impl<B> PrincipalExt for axum::extract::Request<B> {
    fn principal(&self) -> Option<&Principal> {
        self.extensions().get::<Principal>()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_extract_token_from_header() {
        let headers = headers(&[("authorization", "Bearer abc.def.ghi")]);
        let (token, source) = extract_token(&headers).unwrap();

        assert_eq!(token, "abc.def.ghi");
        assert_eq!(source, TokenSource::Header);
    }

    #[test]
    fn test_extract_token_from_cookie() {
        let headers = headers(&[("cookie", "session_active=true; auth_token=abc.def.ghi")]);
        let (token, source) = extract_token(&headers).unwrap();

        assert_eq!(token, "abc.def.ghi");
        assert_eq!(source, TokenSource::Cookie);
    }

    #[test]
    fn test_header_takes_precedence_over_cookie() {
        let headers = headers(&[
            ("authorization", "Bearer from-header"),
            ("cookie", "auth_token=from-cookie"),
        ]);
        let (token, source) = extract_token(&headers).unwrap();

        assert_eq!(token, "from-header");
        assert_eq!(source, TokenSource::Header);
    }

    #[test]
    fn test_extract_token_missing() {
        assert!(extract_token(&HeaderMap::new()).is_none());
        assert!(extract_token(&headers(&[("cookie", "other=1")])).is_none());
        assert!(extract_token(&headers(&[("authorization", "Basic dXNlcg==")])).is_none());
    }

    #[test]
    fn test_extract_token_rejects_empty_values() {
        assert!(extract_token(&headers(&[("authorization", "Bearer ")])).is_none());
        assert!(extract_token(&headers(&[("cookie", "auth_token=")])).is_none());
    }

    #[test]
    fn test_authenticated_token_debug_is_redacted() {
        let token = AuthenticatedToken {
            token: "secret-jwt".to_string(),
            expires_at: Utc::now(),
        };
        let debug_str = format!("{token:?}");

        assert!(!debug_str.contains("secret-jwt"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }
}
