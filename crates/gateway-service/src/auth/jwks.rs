//! JWKS client for fetching and caching public keys from the identity provider.
//!
//! The JWKS (JSON Web Key Set) client fetches public keys from the identity
//! provider's JWKS endpoint and caches them with a configurable TTL.
//!
//! # Security
//!
//! - Keys are cached to reduce load on the provider and improve latency
//! - Cache is invalidated on TTL expiry to pick up key rotations
//! - An unknown key id can force an out-of-band refresh (single-retry
//!   rotation handling lives in the validator)
//! - HTTPS should be used in production (enforced by deployment config)

use crate::errors::GatewayError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;

/// Default cache TTL in seconds (5 minutes).
const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// JSON Web Key from the JWKS endpoint.
///
/// Identity providers publish RSA keys (`kty = "RSA"`, RS256) here;
/// Ed25519 keys (`kty = "OKP"`) are also accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "OKP").
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Algorithm ("RS256" or "EdDSA").
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url encoded).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url encoded).
    #[serde(default)]
    pub e: Option<String>,

    /// Curve name for OKP keys (always "Ed25519").
    #[serde(default)]
    pub crv: Option<String>,

    /// Public key value for OKP keys (base64url encoded).
    #[serde(default)]
    pub x: Option<String>,
}

/// JWKS response from the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    /// List of JSON Web Keys.
    pub keys: Vec<Jwk>,
}

/// Cached JWKS data with expiry time.
struct CachedJwks {
    /// Map of key ID to JWK.
    keys: HashMap<String, Jwk>,

    /// When this cache entry expires.
    expires_at: Instant,
}

/// JWKS client for fetching and caching public keys.
///
/// Thread-safe client that fetches JWKS from the identity provider and
/// caches the keys with configurable TTL.
pub struct JwksClient {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,

    /// Cached JWKS data.
    cache: Arc<RwLock<Option<CachedJwks>>>,

    /// Cache TTL duration.
    cache_ttl: Duration,
}

impl JwksClient {
    /// Create a new JWKS client.
    ///
    /// # Arguments
    ///
    /// * `jwks_url` - URL to the identity provider's JWKS endpoint
    pub fn new(jwks_url: String) -> Self {
        Self::with_ttl(jwks_url, Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS))
    }

    /// Create a new JWKS client with custom cache TTL.
    pub fn with_ttl(jwks_url: String, cache_ttl: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gw.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            cache: Arc::new(RwLock::new(None)),
            cache_ttl,
        }
    }

    /// Get a JWK by key ID.
    ///
    /// Returns the JWK if found, or fetches from the provider if the cache
    /// is expired or empty.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ServiceUnavailable` if JWKS cannot be fetched.
    /// Returns `GatewayError::InvalidToken` if the key ID is not found.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Jwk, GatewayError> {
        // Check cache first
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() {
                    if let Some(key) = cached.keys.get(kid) {
                        tracing::debug!(target: "gw.auth.jwks", kid = %kid, "JWKS cache hit");
                        return Ok(key.clone());
                    }
                    // Key not found in valid cache
                    tracing::debug!(target: "gw.auth.jwks", kid = %kid, "Key not found in JWKS cache");
                    return Err(GatewayError::InvalidToken(
                        "The access token is invalid or expired".to_string(),
                    ));
                }
            }
        }

        // Cache miss or expired - fetch fresh JWKS
        self.refresh_cache().await?;

        // Try to get key from refreshed cache
        let cache = self.cache.read().await;
        if let Some(cached) = cache.as_ref() {
            if let Some(key) = cached.keys.get(kid) {
                return Ok(key.clone());
            }
        }

        // Key not found even after refresh
        tracing::warn!(target: "gw.auth.jwks", kid = %kid, "Key not found in JWKS after refresh");
        Err(GatewayError::InvalidToken(
            "The access token is invalid or expired".to_string(),
        ))
    }

    /// Refresh the JWKS cache by fetching from the identity provider.
    #[instrument(skip(self))]
    async fn refresh_cache(&self) -> Result<(), GatewayError> {
        tracing::debug!(target: "gw.auth.jwks", url = %self.jwks_url, "Fetching JWKS from identity provider");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gw.auth.jwks", error = %e, "Failed to fetch JWKS");
                GatewayError::ServiceUnavailable("Authentication service unavailable".to_string())
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "gw.auth.jwks",
                status = %response.status(),
                "JWKS endpoint returned error"
            );
            return Err(GatewayError::ServiceUnavailable(
                "Authentication service unavailable".to_string(),
            ));
        }

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            tracing::error!(target: "gw.auth.jwks", error = %e, "Failed to parse JWKS response");
            GatewayError::ServiceUnavailable("Authentication service unavailable".to_string())
        })?;

        // Build key map
        let keys: HashMap<String, Jwk> = jwks
            .keys
            .into_iter()
            .map(|key| (key.kid.clone(), key))
            .collect();

        tracing::info!(
            target: "gw.auth.jwks",
            key_count = keys.len(),
            "JWKS cache refreshed"
        );

        // Update cache
        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            keys,
            expires_at: Instant::now() + self.cache_ttl,
        });

        Ok(())
    }

    /// Force refresh the cache.
    ///
    /// Used by the validator's single key-rotation retry, and exposed for
    /// administrative invalidation.
    pub async fn force_refresh(&self) -> Result<(), GatewayError> {
        self.refresh_cache().await
    }
}
