//! Request middleware: authentication and permission guards.

pub mod auth;
pub mod permissions;

pub use auth::{require_auth, AuthState, AuthenticatedToken};
