//! Login, callback, logout and session-check handlers.
//!
//! The login/callback pair implements the authorization-code flow against
//! the identity provider; the callback is the one place the organization
//! synchronizer runs. Cookies carry the bearer token (HttpOnly) plus a
//! JavaScript-readable user summary for the frontend.

use crate::auth::claims::Principal;
use crate::config::AUTH_COOKIE_NAME;
use crate::errors::GatewayError;
use crate::middleware::auth::{extract_token, AuthenticatedToken};
use crate::observability::metrics;
use crate::routes::AppState;
use crate::services::oidc::{generate_state, ExchangeError};
use crate::services::sync;
use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use common::secret::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Cookies managed by the login/logout pair.
const SESSION_COOKIES: &[&str] = &[AUTH_COOKIE_NAME, "user_data", "session_active"];

/// Cookie lifetime ceiling (24h) regardless of token expiry.
const MAX_COOKIE_AGE_SECONDS: i64 = 24 * 3600;

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub force_new_login: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Handler for GET /auth/login
///
/// An already-authenticated browser (valid token cookie) is bounced
/// straight to the frontend; everyone else is redirected to the identity
/// provider's authorize endpoint. `?force_new_login=true` (or
/// `?prompt=login`) makes the provider discard its session first, which
/// breaks the redirect loop a disabled account would otherwise enter.
#[instrument(skip_all, name = "gw.handlers.login")]
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<LoginParams>,
) -> Response {
    if let Some((token, _)) = extract_token(&headers) {
        if state.validator.validate(&token).await.is_ok() {
            tracing::debug!(
                target: "gw.handlers.auth",
                "Valid session cookie found, redirecting to frontend"
            );
            return Redirect::to(&format!("{}/dashboard", state.config.frontend_url))
                .into_response();
        }
    }

    let oauth_state = generate_state();
    let force_new_login = params.force_new_login.as_deref() == Some("true")
        || params.prompt.as_deref() == Some("login");

    let authorize = state.oidc.authorize_redirect(&oauth_state, force_new_login);
    tracing::info!(
        target: "gw.handlers.auth",
        force_new_login = force_new_login,
        "Redirecting to identity provider"
    );

    Redirect::to(&authorize).into_response()
}

/// Handler for GET /auth/callback
///
/// Exchanges the authorization code, fetches userinfo, synchronizes the
/// employee and their roles, then establishes the session cookies. A
/// disabled account gets its cookies cleared and is sent through the
/// provider's end-session endpoint instead of into the app.
#[instrument(skip_all, name = "gw.handlers.callback")]
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, GatewayError> {
    let code = params
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("Missing code parameter".to_string()))?;
    params
        .state
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("Missing state parameter".to_string()))?;

    let exchange = match state.oidc.exchange_code(code).await {
        Ok(exchange) => exchange,
        Err(ExchangeError::InvalidGrant) => {
            // A reused or expired code: send the browser back to the login
            // page instead of letting it retry the same code against us.
            metrics::record_login("code_expired");
            return Ok(Redirect::to(&format!(
                "{}/login?error=code_expired",
                state.config.frontend_url
            ))
            .into_response());
        }
        Err(e) => {
            metrics::record_login("error");
            return Err(e.into());
        }
    };

    let profile = match state.oidc.fetch_userinfo(&exchange.access_token).await {
        Ok(profile) => profile,
        Err(e) => {
            metrics::record_login("error");
            return Err(e);
        }
    };

    let employee = match sync::sync_user(&state.pool, &profile).await {
        Ok(employee) => employee,
        Err(e) => {
            metrics::record_login("error");
            return Err(e);
        }
    };

    if !employee.active {
        metrics::record_login("disabled");
        tracing::warn!(
            target: "gw.handlers.auth",
            employee_id = %employee.employee_id,
            "Disabled account completed the identity exchange, ending provider session"
        );

        let end_session = state.oidc.end_session_redirect(
            exchange.id_token.as_ref().map(|t| t.expose_secret()),
            &format!("{}/login?error=account_disabled", state.config.frontend_url),
        );

        let mut response = Redirect::to(&end_session).into_response();
        append_cookie_clears(&mut response)?;
        return Ok(response);
    }

    metrics::record_login("success");
    tracing::info!(
        target: "gw.handlers.auth",
        employee_id = %employee.employee_id,
        email = %employee.email,
        "Login completed, session established"
    );

    let max_age = exchange.expires_in.clamp(0, MAX_COOKIE_AGE_SECONDS);
    let user_data = STANDARD.encode(
        serde_json::json!({
            "id": employee.subject_id,
            "name": format!("{} {}", employee.first_name, employee.last_name).trim(),
            "email": employee.email,
        })
        .to_string(),
    );

    let mut response =
        Redirect::to(&format!("{}/dashboard", state.config.frontend_url)).into_response();
    append_cookie(
        &mut response,
        &format!(
            "{AUTH_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
            exchange.access_token.expose_secret()
        ),
    )?;
    append_cookie(
        &mut response,
        &format!("user_data={user_data}; Path=/; SameSite=Lax; Max-Age={max_age}"),
    )?;
    append_cookie(
        &mut response,
        &format!("session_active=true; Path=/; SameSite=Lax; Max-Age={max_age}"),
    )?;

    Ok(response)
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logout_url: String,
}

/// Handler for POST /auth/logout (authenticated)
///
/// Revokes the presented token until its natural expiry - the next request
/// with it is denied even though it is still cryptographically valid and
/// cache-fresh - then clears the session cookies and hands back the
/// provider's end-session URL for the frontend to follow.
#[instrument(skip_all, name = "gw.handlers.logout")]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(authenticated): Extension<AuthenticatedToken>,
) -> Result<Response, GatewayError> {
    state
        .revocations
        .add(&authenticated.token, authenticated.expires_at);
    state.cache.invalidate(&authenticated.token);

    let logout_url = state
        .oidc
        .end_session_redirect(None, &format!("{}/login", state.config.frontend_url));

    let mut response = Json(LogoutResponse { logout_url }).into_response();
    append_cookie_clears(&mut response)?;
    Ok(response)
}

#[derive(Debug, Serialize)]
pub struct SessionCheckResponse {
    pub authenticated: bool,
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub groups: Vec<String>,
    pub factory_names: Vec<String>,
}

/// Handler for GET /auth/check (authenticated)
///
/// Summary of the propagated principal; `factory_names` is always present,
/// empty for principals without an organization claim.
#[instrument(skip_all, name = "gw.handlers.check")]
pub async fn check(Extension(principal): Extension<Principal>) -> Json<SessionCheckResponse> {
    Json(SessionCheckResponse {
        authenticated: true,
        user_id: principal.user_id,
        email: principal.email,
        name: principal.name,
        groups: principal.groups,
        factory_names: principal.factory_names,
    })
}

fn append_cookie(response: &mut Response, cookie: &str) -> Result<(), GatewayError> {
    let value = HeaderValue::from_str(cookie).map_err(|e| {
        tracing::error!(target: "gw.handlers.auth", error = %e, "Invalid cookie header value");
        GatewayError::Internal
    })?;
    response.headers_mut().append(SET_COOKIE, value);
    Ok(())
}

fn append_cookie_clears(response: &mut Response) -> Result<(), GatewayError> {
    for name in SESSION_COOKIES {
        append_cookie(
            response,
            &format!("{name}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"),
        )?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_append_cookie_clears_all_session_cookies() {
        let mut response = axum::response::Response::new(Body::empty());
        append_cookie_clears(&mut response).unwrap();

        let cookies: Vec<&str> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();

        assert_eq!(cookies.len(), SESSION_COOKIES.len());
        assert!(cookies.iter().any(|c| c.starts_with("auth_token=;")));
        assert!(cookies.iter().any(|c| c.starts_with("user_data=;")));
        assert!(cookies.iter().any(|c| c.starts_with("session_active=;")));
        assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
    }

    #[test]
    fn test_session_check_response_serialization() {
        let response = SessionCheckResponse {
            authenticated: true,
            user_id: "u1".to_string(),
            email: "pat@example.com".to_string(),
            name: "Pat Doe".to_string(),
            groups: vec!["mes-users".to_string()],
            factory_names: vec![],
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"authenticated\":true"));
        assert!(json.contains("\"factory_names\":[]"));
    }

    #[tokio::test]
    async fn test_check_handler_reflects_principal() {
        use crate::auth::claims::Claims;

        let claims = Claims {
            sub: "u1".to_string(),
            exp: 2_000_000_000,
            iat: 1_700_000_000,
            email: Some("pat@example.com".to_string()),
            name: Some("Pat".to_string()),
            groups: None,
            organization: None,
        };

        let Json(body) = check(Extension(Principal::from_claims(&claims))).await;
        assert!(body.authenticated);
        assert_eq!(body.user_id, "u1");
        assert!(body.factory_names.is_empty());
    }

    #[test]
    fn test_cookie_clamp_constant() {
        assert_eq!(MAX_COOKIE_AGE_SECONDS, 86400);
    }
}
