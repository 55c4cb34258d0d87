//! Authentication and authorization core.
//!
//! Per-request flow: validation cache -> signature validator (JWKS) ->
//! revocation store -> claims propagation. The permission evaluator is
//! invoked by downstream route guards on the propagated principal.

pub mod cache;
pub mod claims;
pub mod jwks;
pub mod jwt;
pub mod permissions;
pub mod revocation;

pub use cache::ValidationCache;
pub use claims::{Claims, IdentityProfile, OrganizationTree, Principal};
pub use jwks::JwksClient;
pub use jwt::{JwtValidator, TokenError};
pub use revocation::RevocationStore;
