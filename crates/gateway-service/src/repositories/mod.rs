//! Database access layer.

pub mod employees;
pub mod org_roles;
pub mod org_units;
