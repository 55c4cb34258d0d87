//! Identity-provider client for the authorization-code login path.
//!
//! The exchange itself is treated as opaque: this client builds the
//! authorize redirect, swaps the callback code for tokens, fetches the
//! userinfo document the synchronizer consumes, and constructs the
//! end-session URL for logouts. Timeouts bound every outbound call.

use crate::auth::claims::IdentityProfile;
use crate::config::Config;
use crate::errors::GatewayError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::secret::ExposeSecret;
use common::secret::SecretString;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Scopes requested on the authorize redirect.
const OAUTH_SCOPES: &str = "openid profile email";

/// Errors from the code-exchange step.
///
/// `InvalidGrant` is separated out so the callback handler can redirect a
/// reused/expired code back to the login page instead of returning 5xx.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("authorization code already used or expired")]
    InvalidGrant,

    #[error("identity provider rejected the exchange: {0}")]
    Rejected(String),

    #[error("identity provider unreachable: {0}")]
    Unavailable(String),
}

impl From<ExchangeError> for GatewayError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::InvalidGrant | ExchangeError::Rejected(_) => {
                GatewayError::BadRequest(err.to_string())
            }
            ExchangeError::Unavailable(reason) => GatewayError::ServiceUnavailable(reason),
        }
    }
}

/// Result of exchanging an authorization code.
#[derive(Clone)]
pub struct TokenExchange {
    /// Bearer access token (the JWT this gateway validates).
    pub access_token: SecretString,

    /// Token type, normally "Bearer".
    pub token_type: String,

    /// Lifetime in seconds as reported by the provider.
    pub expires_in: i64,

    /// OIDC id token, forwarded as a logout hint when present.
    pub id_token: Option<SecretString>,
}

impl fmt::Debug for TokenExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchange")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_id_token", &self.id_token.is_some())
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponseBody {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Generate a random OAuth `state` value (32 bytes, base64url).
#[must_use]
pub fn generate_state() -> String {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    if rng.fill(&mut bytes).is_err() {
        // SystemRandom does not fail on supported platforms; fall back to a
        // process-unique value rather than aborting the login.
        tracing::error!(target: "gw.services.oidc", "CSPRNG failure generating state");
        return format!("fallback-{}", uuid::Uuid::new_v4());
    }
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Client for the identity provider's OAuth2/OIDC endpoints.
pub struct OidcClient {
    http_client: reqwest::Client,
    authorize_url: String,
    token_url: String,
    userinfo_url: String,
    end_session_url: String,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
}

impl OidcClient {
    /// Build a client from the gateway configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gw.services.oidc", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            http_client,
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            userinfo_url: config.userinfo_url.clone(),
            end_session_url: config.end_session_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        }
    }

    /// Build the authorize redirect URL.
    ///
    /// `force_new_login` adds `prompt=login select_account` and `max_age=0`
    /// so the provider discards any existing session and shows the login
    /// screen - used to break redirect loops for disabled accounts.
    #[must_use]
    pub fn authorize_redirect(&self, state: &str, force_new_login: bool) -> String {
        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorize_url,
            urlencode(&self.client_id),
            urlencode(&self.redirect_uri),
            urlencode(OAUTH_SCOPES),
            urlencode(state),
        );

        if force_new_login {
            url.push_str("&prompt=");
            url.push_str(&urlencode("login select_account"));
            url.push_str("&max_age=0");
        }

        url
    }

    /// Exchange an authorization code for tokens.
    #[instrument(skip_all)]
    pub async fn exchange_code(&self, code: &str) -> Result<TokenExchange, ExchangeError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gw.services.oidc", error = %e, "Token endpoint unreachable");
                ExchangeError::Unavailable("identity provider unreachable".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("invalid_grant") {
                tracing::warn!(
                    target: "gw.services.oidc",
                    "Authorization code already used or expired"
                );
                return Err(ExchangeError::InvalidGrant);
            }
            tracing::error!(
                target: "gw.services.oidc",
                status = %status,
                "Token endpoint rejected the exchange"
            );
            return Err(ExchangeError::Rejected(format!(
                "token endpoint returned {status}"
            )));
        }

        let body: TokenResponseBody = response.json().await.map_err(|e| {
            tracing::error!(target: "gw.services.oidc", error = %e, "Failed to parse token response");
            ExchangeError::Rejected("malformed token response".to_string())
        })?;

        tracing::info!(
            target: "gw.services.oidc",
            token_type = %body.token_type,
            expires_in = body.expires_in.unwrap_or_default(),
            "Authorization code exchanged"
        );

        Ok(TokenExchange {
            access_token: SecretString::from(body.access_token),
            token_type: body.token_type,
            expires_in: body.expires_in.unwrap_or(3600),
            id_token: body.id_token.map(SecretString::from),
        })
    }

    /// Fetch the userinfo document for an access token.
    #[instrument(skip_all)]
    pub async fn fetch_userinfo(
        &self,
        access_token: &SecretString,
    ) -> Result<IdentityProfile, GatewayError> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gw.services.oidc", error = %e, "Userinfo endpoint unreachable");
                GatewayError::ServiceUnavailable("identity provider unreachable".to_string())
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "gw.services.oidc",
                status = %response.status(),
                "Userinfo endpoint returned error"
            );
            return Err(GatewayError::ServiceUnavailable(
                "identity provider rejected the userinfo request".to_string(),
            ));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            tracing::error!(target: "gw.services.oidc", error = %e, "Failed to parse userinfo response");
            GatewayError::ServiceUnavailable("malformed userinfo response".to_string())
        })?;

        IdentityProfile::from_userinfo(&body).ok_or_else(|| {
            GatewayError::ServiceUnavailable("userinfo response has no subject".to_string())
        })
    }

    /// Build the provider's end-session URL for a logout.
    #[must_use]
    pub fn end_session_redirect(
        &self,
        id_token_hint: Option<&str>,
        post_logout_redirect: &str,
    ) -> String {
        let mut url = format!(
            "{}?post_logout_redirect_uri={}",
            self.end_session_url,
            urlencode(post_logout_redirect),
        );
        if let Some(hint) = id_token_hint {
            url.push_str("&id_token_hint=");
            url.push_str(&urlencode(hint));
        }
        url
    }
}

/// Percent-encode a query-string component.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            other => {
                out.push_str(&format!("%{other:02X}"));
            }
        }
    }
    out
}
