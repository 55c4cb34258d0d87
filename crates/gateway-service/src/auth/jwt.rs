//! JWT validation against the identity provider's rotating key set.
//!
//! Validates incoming bearer tokens using public keys fetched from the
//! provider's JWKS endpoint.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - RS256 (RSA) and EdDSA (Ed25519) keys are accepted, selected by the
//!   JWK key type; the token's own `alg` header is never trusted to pick
//!   the verification algorithm
//! - Expiration and issued-at claims are validated with clock skew tolerance
//! - An unknown key id triggers exactly one forced JWKS refresh and retry,
//!   so provider key rotation does not produce a window of spurious 401s

use crate::auth::claims::Claims;
use crate::auth::jwks::{Jwk, JwksClient};
use crate::errors::GatewayError;
use common::jwt::{decode_ed25519_public_key_jwk, extract_kid, validate_iat, JwtValidationError};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Token validation failures.
///
/// Time-claim failures (exp in the past, nbf/iat out of range) all surface
/// as `Expired`; anything that prevents parsing is `MalformedToken`; key
/// mismatch and signature failures are `InvalidSignature`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token could not be parsed")]
    MalformedToken,

    #[error("token signature could not be verified")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("signing key set unavailable")]
    KeySetUnavailable,
}

impl From<TokenError> for GatewayError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::KeySetUnavailable => {
                GatewayError::ServiceUnavailable("Authentication service unavailable".to_string())
            }
            other => GatewayError::InvalidToken(other.to_string()),
        }
    }
}

/// JWT validator using the identity provider's JWKS.
pub struct JwtValidator {
    /// JWKS client for fetching public keys.
    jwks_client: Arc<JwksClient>,

    /// Clock skew tolerance for iat validation.
    clock_skew: Duration,
}

impl JwtValidator {
    /// Create a new JWT validator.
    ///
    /// # Arguments
    ///
    /// * `jwks_client` - Client for fetching public keys
    /// * `clock_skew_seconds` - Clock skew tolerance for iat validation
    pub fn new(jwks_client: Arc<JwksClient>, clock_skew_seconds: i64) -> Self {
        #[allow(clippy::cast_sign_loss)]
        let clock_skew = Duration::from_secs(clock_skew_seconds.max(0) as u64);
        Self {
            jwks_client,
            clock_skew,
        }
    }

    /// Validate a JWT and return the claims.
    ///
    /// # Validation steps
    ///
    /// 1. Size check - reject tokens > 8KB before parsing
    /// 2. Extract kid from the header to find the correct key
    /// 3. Fetch the public key from JWKS; on an unknown kid, force one
    ///    refresh of the key set and retry once (key rotation)
    /// 4. Verify the signature with the algorithm implied by the JWK
    /// 5. Validate the exp claim (reject expired tokens)
    /// 6. Validate the iat claim with clock skew tolerance
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] describing the failure class. The error
    /// detail shown to clients stays generic.
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        // 1 + 2. Extract kid from JWT header (includes size check)
        let kid = extract_kid(token).map_err(|e| {
            tracing::debug!(target: "gw.auth.jwt", error = ?e, "Token kid extraction failed");
            match e {
                JwtValidationError::MissingKid => TokenError::InvalidSignature,
                _ => TokenError::MalformedToken,
            }
        })?;

        // 3. Fetch public key from JWKS, retrying once against a freshly
        // fetched key set when the kid is unknown (rotation window).
        let jwk = match self.jwks_client.get_key(&kid).await {
            Ok(jwk) => jwk,
            Err(GatewayError::InvalidToken(_)) => {
                tracing::debug!(
                    target: "gw.auth.jwt",
                    kid = %kid,
                    "Unknown key id, forcing JWKS refresh and retrying once"
                );
                self.jwks_client
                    .force_refresh()
                    .await
                    .map_err(|_| TokenError::KeySetUnavailable)?;
                self.jwks_client
                    .get_key(&kid)
                    .await
                    .map_err(|_| TokenError::InvalidSignature)?
            }
            Err(_) => return Err(TokenError::KeySetUnavailable),
        };

        // 4 + 5. Verify signature and standard claims
        let claims = verify_token(token, &jwk)?;

        // 6. Validate iat claim with clock skew tolerance
        if let Err(e) = validate_iat(claims.iat, self.clock_skew) {
            tracing::debug!(target: "gw.auth.jwt", error = ?e, "Token iat validation failed");
            return Err(TokenError::Expired);
        }

        tracing::debug!(target: "gw.auth.jwt", "Token validated successfully");
        Ok(claims)
    }
}

/// Build the decoding key and algorithm for a JWK.
fn decoding_key_for(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), TokenError> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_ref().ok_or_else(|| {
                tracing::error!(target: "gw.auth.jwt", kid = %jwk.kid, "RSA JWK missing n field");
                TokenError::InvalidSignature
            })?;
            let e = jwk.e.as_ref().ok_or_else(|| {
                tracing::error!(target: "gw.auth.jwt", kid = %jwk.kid, "RSA JWK missing e field");
                TokenError::InvalidSignature
            })?;

            let key = DecodingKey::from_rsa_components(n, e).map_err(|err| {
                tracing::error!(target: "gw.auth.jwt", error = %err, "Invalid RSA key components");
                TokenError::InvalidSignature
            })?;

            Ok((key, Algorithm::RS256))
        }
        "OKP" => {
            let x = jwk.x.as_ref().ok_or_else(|| {
                tracing::error!(target: "gw.auth.jwt", kid = %jwk.kid, "OKP JWK missing x field");
                TokenError::InvalidSignature
            })?;

            let public_key_bytes = decode_ed25519_public_key_jwk(x).map_err(|err| {
                tracing::error!(target: "gw.auth.jwt", error = %err, "Invalid public key encoding");
                TokenError::InvalidSignature
            })?;

            Ok((DecodingKey::from_ed_der(&public_key_bytes), Algorithm::EdDSA))
        }
        other => {
            tracing::warn!(target: "gw.auth.jwt", kty = %other, "Unexpected JWK key type");
            Err(TokenError::InvalidSignature)
        }
    }
}

/// Verify JWT signature and extract claims.
fn verify_token(token: &str, jwk: &Jwk) -> Result<Claims, TokenError> {
    let (decoding_key, algorithm) = decoding_key_for(jwk)?;

    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    // Audience is not enforced here - permission checks operate on the
    // organization claims instead.
    validation.validate_aud = false;

    let token_data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(target: "gw.auth.jwt", error = %e, "Token verification failed");
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature
            | jsonwebtoken::errors::ErrorKind::ImmatureSignature => TokenError::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature
            | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm
            | jsonwebtoken::errors::ErrorKind::InvalidKeyFormat => TokenError::InvalidSignature,
            _ => TokenError::MalformedToken,
        }
    })?;

    Ok(token_data.claims)
}
