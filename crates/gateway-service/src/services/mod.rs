//! Business logic layer.

pub mod oidc;
pub mod sync;

pub use oidc::OidcClient;
