//! Data models for the gateway's persistence layer.
//!
//! Row structs map 1:1 onto the tables created by the workspace
//! migrations. All primary keys are UUIDs; timestamps are UTC.

use crate::auth::claims::normalized_name;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Employee record synchronized from the identity provider.
///
/// `active` is the administrative gate: only an external administrative
/// action may set it to `false`, and the synchronization path never sets
/// it back to `true` for a disabled account.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Employee {
    pub employee_id: Uuid,
    pub subject_id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub workday_id: Option<String>,
    pub national_id: Option<String>,
    pub active: bool,
    pub external: bool,
    pub hire_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Physical asset reference row (static code table).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Asset {
    pub asset_id: Uuid,
    pub code: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Factory reference entity, deduplicated by case-folded name and linked
/// to a physical asset where resolvable.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Factory {
    pub factory_id: Uuid,
    pub name: String,
    pub asset_id: Option<Uuid>,
    pub asset_code: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Department reference entity, deduplicated by case-folded name.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Department {
    pub department_id: Uuid,
    pub name: String,
    pub code: String,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Factory <-> department junction row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FactoryDepartment {
    pub factory_department_id: Uuid,
    pub factory_id: Uuid,
    pub department_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Employee assignment to a factory/department pair.
///
/// Existence implies "this employee has or had access through this
/// factory/department"; rows are created on demand and never deleted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmployeeFactoryDepartment {
    pub assignment_id: Uuid,
    pub employee_id: Uuid,
    pub factory_department_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub is_primary_assignment: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-employee role grant mirrored from token claims.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EmployeeOrgRole {
    pub role_id: Uuid,
    pub employee_id: Uuid,
    pub factory: String,
    pub department: String,
    pub role: String,
    pub is_active: bool,
    pub assigned_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A (factory, department, role) triple extracted from the organization
/// tree, as received from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RoleTriple {
    pub factory: String,
    pub department: String,
    pub role: String,
}

impl RoleTriple {
    /// Case-folded, trimmed key used for set-difference reconciliation and
    /// persistence-key comparison.
    #[must_use]
    pub fn key(&self) -> (String, String, String) {
        (
            normalized_name(&self.factory),
            normalized_name(&self.department),
            normalized_name(&self.role),
        )
    }
}
