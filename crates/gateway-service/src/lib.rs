//! Millgate Gateway Service Library
//!
//! Claims-derived authorization core for a multi-tenant manufacturing-data
//! API gateway: bearer-token verification against a rotating key set,
//! concurrent validation caching, revocation, claims-to-context
//! propagation, pure permission evaluation, and reconciliation of the
//! token-embedded organization tree into a normalized relational model.
//!
//! # Modules
//!
//! - `auth` - Validation cache, revocation store, JWKS/JWT validation,
//!   claims/principal types, permission evaluator
//! - `config` - Service configuration
//! - `errors` - Error types
//! - `handlers` - HTTP request handlers
//! - `middleware` - Authentication and permission guards
//! - `models` - Data models
//! - `observability` - Metrics
//! - `repositories` - Database access layer
//! - `routes` - Router assembly and application state
//! - `services` - Business logic layer (identity exchange, synchronization)

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
