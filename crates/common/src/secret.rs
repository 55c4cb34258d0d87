//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types
//! for all sensitive values like OAuth client secrets, bearer tokens, and
//! cookie contents.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding one gets safe logging behavior for free;
//! the wrapped value is only reachable through an explicit
//! `expose_secret()` call and is zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct TokenExchange {
//!     token_type: String,
//!     access_token: SecretString,  // Debug shows "[REDACTED]"
//! }
//!
//! let exchange = TokenExchange {
//!     token_type: "Bearer".to_string(),
//!     access_token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! // Safe - the token is redacted
//! println!("{:?}", exchange);
//!
//! // Explicit access only
//! let header = format!("Bearer {}", exchange.access_token.expose_secret());
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_value() {
        let secret = SecretString::from("client-secret-123");
        assert_eq!(secret.expose_secret(), "client-secret-123");
    }

    #[test]
    fn test_deserialize_from_json() {
        #[derive(Debug, Deserialize)]
        struct OidcCredentials {
            client_id: String,
            client_secret: SecretString,
        }

        let json = r#"{"client_id": "millgate-api", "client_secret": "secret-key"}"#;
        let creds: OidcCredentials = serde_json::from_str(json).unwrap();

        assert_eq!(creds.client_id, "millgate-api");
        assert_eq!(creds.client_secret.expose_secret(), "secret-key");

        let debug_str = format!("{creds:?}");
        assert!(!debug_str.contains("secret-key"));
    }
}
