//! Gateway configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default bind address for the HTTP server.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default frontend base URL used for post-login redirects.
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";

/// Name of the cookie carrying the bearer token when no Authorization
/// header is present.
pub const AUTH_COOKIE_NAME: &str = "auth_token";

/// Gateway configuration.
///
/// Loaded from environment variables with sensible defaults. Identity
/// provider endpoints default to standard OAuth2 paths under the issuer
/// and can be overridden individually for providers with custom layouts.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8081").
    pub bind_address: String,

    /// Identity provider issuer base URL.
    pub issuer: String,

    /// URL to the identity provider's JWKS endpoint.
    pub jwks_url: String,

    /// URL to the identity provider's authorization endpoint.
    pub authorize_url: String,

    /// URL to the identity provider's token endpoint.
    pub token_url: String,

    /// URL to the identity provider's userinfo endpoint.
    pub userinfo_url: String,

    /// URL to the identity provider's end-session (logout) endpoint.
    pub end_session_url: String,

    /// OAuth2 client identifier registered with the identity provider.
    pub client_id: String,

    /// OAuth2 client secret.
    pub client_secret: SecretString,

    /// Redirect URI for the authorization-code callback.
    pub redirect_uri: String,

    /// Frontend base URL for post-login redirects.
    pub frontend_url: String,

    /// JWT clock skew tolerance in seconds for iat validation.
    pub jwt_clock_skew_seconds: i64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("issuer", &self.issuer)
            .field("jwks_url", &self.jwks_url)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("end_session_url", &self.end_session_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("frontend_url", &self.frontend_url)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let issuer = vars
            .get("IDP_ISSUER")
            .ok_or_else(|| ConfigError::MissingEnvVar("IDP_ISSUER".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let jwks_url = vars
            .get("IDP_JWKS_URL")
            .cloned()
            .unwrap_or_else(|| format!("{issuer}/.well-known/jwks.json"));

        let authorize_url = vars
            .get("IDP_AUTHORIZE_URL")
            .cloned()
            .unwrap_or_else(|| format!("{issuer}/oauth2/authorize"));

        let token_url = vars
            .get("IDP_TOKEN_URL")
            .cloned()
            .unwrap_or_else(|| format!("{issuer}/oauth2/token"));

        let userinfo_url = vars
            .get("IDP_USERINFO_URL")
            .cloned()
            .unwrap_or_else(|| format!("{issuer}/oauth2/userinfo"));

        let end_session_url = vars
            .get("IDP_END_SESSION_URL")
            .cloned()
            .unwrap_or_else(|| format!("{issuer}/oauth2/end-session"));

        let client_id = vars
            .get("IDP_CLIENT_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("IDP_CLIENT_ID".to_string()))?
            .clone();

        let client_secret = SecretString::from(
            vars.get("IDP_CLIENT_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("IDP_CLIENT_SECRET".to_string()))?
                .clone(),
        );

        let redirect_uri = vars
            .get("OAUTH_REDIRECT_URI")
            .ok_or_else(|| ConfigError::MissingEnvVar("OAUTH_REDIRECT_URI".to_string()))?
            .clone();

        let frontend_url = vars
            .get("FRONTEND_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string());

        let jwt_clock_skew_seconds = match vars.get("JWT_CLOCK_SKEW_SECONDS") {
            Some(raw) => {
                let parsed: i64 = raw.parse().map_err(|_| {
                    ConfigError::InvalidJwtClockSkew(format!("not a number: {raw}"))
                })?;
                #[allow(clippy::cast_possible_wrap)]
                let max = MAX_CLOCK_SKEW.as_secs() as i64;
                if parsed < 0 || parsed > max {
                    return Err(ConfigError::InvalidJwtClockSkew(format!(
                        "must be between 0 and {max} seconds, got {parsed}"
                    )));
                }
                parsed
            }
            #[allow(clippy::cast_possible_wrap)]
            None => DEFAULT_CLOCK_SKEW.as_secs() as i64,
        };

        Ok(Config {
            database_url,
            bind_address,
            issuer,
            jwks_url,
            authorize_url,
            token_url,
            userinfo_url,
            end_session_url,
            client_id,
            client_secret,
            redirect_uri,
            frontend_url,
            jwt_clock_skew_seconds,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn required_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://localhost/millgate".to_string(),
            ),
            (
                "IDP_ISSUER".to_string(),
                "https://idp.example.com".to_string(),
            ),
            ("IDP_CLIENT_ID".to_string(), "millgate-api".to_string()),
            ("IDP_CLIENT_SECRET".to_string(), "s3cret".to_string()),
            (
                "OAUTH_REDIRECT_URI".to_string(),
                "http://localhost:8081/auth/callback".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&required_vars()).expect("config should load");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(
            config.jwks_url,
            "https://idp.example.com/.well-known/jwks.json"
        );
        assert_eq!(
            config.authorize_url,
            "https://idp.example.com/oauth2/authorize"
        );
        assert_eq!(config.token_url, "https://idp.example.com/oauth2/token");
        assert_eq!(
            config.userinfo_url,
            "https://idp.example.com/oauth2/userinfo"
        );
        assert_eq!(
            config.end_session_url,
            "https://idp.example.com/oauth2/end-session"
        );
        assert_eq!(config.frontend_url, DEFAULT_FRONTEND_URL);
        assert_eq!(config.jwt_clock_skew_seconds, 300);
    }

    #[test]
    fn test_from_vars_missing_database_url() {
        let mut vars = required_vars();
        vars.remove("DATABASE_URL");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn test_from_vars_missing_client_secret() {
        let mut vars = required_vars();
        vars.remove("IDP_CLIENT_SECRET");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "IDP_CLIENT_SECRET"));
    }

    #[test]
    fn test_issuer_trailing_slash_is_trimmed() {
        let mut vars = required_vars();
        vars.insert(
            "IDP_ISSUER".to_string(),
            "https://idp.example.com/".to_string(),
        );

        let config = Config::from_vars(&vars).expect("config should load");
        assert_eq!(config.issuer, "https://idp.example.com");
        assert_eq!(
            config.jwks_url,
            "https://idp.example.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn test_explicit_endpoint_overrides() {
        let mut vars = required_vars();
        vars.insert(
            "IDP_JWKS_URL".to_string(),
            "https://idp.example.com/application/millgate/jwks/".to_string(),
        );

        let config = Config::from_vars(&vars).expect("config should load");
        assert_eq!(
            config.jwks_url,
            "https://idp.example.com/application/millgate/jwks/"
        );
    }

    #[test]
    fn test_clock_skew_bounds() {
        let mut vars = required_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "601".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));

        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "-1".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));

        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "120".to_string());
        let config = Config::from_vars(&vars).expect("config should load");
        assert_eq!(config.jwt_clock_skew_seconds, 120);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::from_vars(&required_vars()).expect("config should load");
        let debug_str = format!("{config:?}");

        assert!(!debug_str.contains("postgresql://localhost/millgate"));
        assert!(!debug_str.contains("s3cret"));
        assert!(debug_str.contains("millgate-api"));
    }
}
