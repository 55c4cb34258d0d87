//! Employee role-grant repository.
//!
//! Primitives for the "mark inactive, then reactivate-or-insert" role
//! reconciliation. The mutating functions take `&mut PgConnection` so the
//! synchronizer can run them inside a single transaction: either all role
//! mutations for an employee commit or none do.

use crate::errors::GatewayError;
use crate::models::{EmployeeOrgRole, RoleTriple};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, QueryBuilder};
use uuid::Uuid;

/// Retention window for rows that stayed inactive: roles a token stopped
/// mentioning survive this long before hard deletion.
pub const INACTIVE_ROLE_RETENTION_DAYS: i64 = 30;

/// Mark every currently-active role row for the employee inactive.
///
/// Returns the number of rows deactivated.
pub async fn deactivate_all(
    conn: &mut PgConnection,
    employee_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64, GatewayError> {
    let result = sqlx::query(
        r#"
        UPDATE employee_org_roles
        SET is_active = FALSE, updated_at = $2
        WHERE employee_id = $1 AND is_active = TRUE
        "#,
    )
    .bind(employee_id)
    .bind(now)
    .execute(conn)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to deactivate existing roles: {e}")))?;

    Ok(result.rows_affected())
}

/// Reactivate a pre-existing role row matching the triple (case-folded).
///
/// Returns `true` when a row was found and reactivated, `false` when the
/// triple is new and needs an insert.
pub async fn reactivate(
    conn: &mut PgConnection,
    employee_id: Uuid,
    triple: &RoleTriple,
    now: DateTime<Utc>,
) -> Result<bool, GatewayError> {
    let result = sqlx::query(
        r#"
        UPDATE employee_org_roles
        SET is_active = TRUE, last_synced_at = $5, updated_at = $5
        WHERE employee_id = $1
          AND LOWER(factory) = LOWER($2)
          AND LOWER(department) = LOWER($3)
          AND LOWER(role) = LOWER($4)
        "#,
    )
    .bind(employee_id)
    .bind(triple.factory.trim())
    .bind(triple.department.trim())
    .bind(triple.role.trim())
    .bind(now)
    .execute(conn)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to reactivate role: {e}")))?;

    Ok(result.rows_affected() > 0)
}

/// Batch-insert new role rows.
pub async fn insert_batch(
    conn: &mut PgConnection,
    employee_id: Uuid,
    triples: &[RoleTriple],
    now: DateTime<Utc>,
) -> Result<(), GatewayError> {
    if triples.is_empty() {
        return Ok(());
    }

    let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
        "INSERT INTO employee_org_roles \
         (employee_id, factory, department, role, is_active, assigned_at, last_synced_at) ",
    );

    builder.push_values(triples, |mut row, triple| {
        row.push_bind(employee_id)
            .push_bind(triple.factory.trim())
            .push_bind(triple.department.trim())
            .push_bind(triple.role.trim())
            .push_bind(true)
            .push_bind(now)
            .push_bind(now);
    });

    builder
        .build()
        .execute(conn)
        .await
        .map_err(|e| GatewayError::Database(format!("Failed to create new roles: {e}")))?;

    Ok(())
}

/// Hard-delete rows that have been inactive since before the cutoff.
///
/// Returns the number of rows purged.
pub async fn purge_inactive_before(
    conn: &mut PgConnection,
    employee_id: Uuid,
    cutoff: DateTime<Utc>,
) -> Result<u64, GatewayError> {
    let result = sqlx::query(
        r#"
        DELETE FROM employee_org_roles
        WHERE employee_id = $1 AND is_active = FALSE AND last_synced_at < $2
        "#,
    )
    .bind(employee_id)
    .bind(cutoff)
    .execute(conn)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to clean up old roles: {e}")))?;

    Ok(result.rows_affected())
}

/// All active role rows for an employee, ordered for stable output.
pub async fn active_roles(
    pool: &PgPool,
    employee_id: Uuid,
) -> Result<Vec<EmployeeOrgRole>, GatewayError> {
    let roles = sqlx::query_as::<_, EmployeeOrgRole>(
        r#"
        SELECT role_id, employee_id, factory, department, role, is_active,
               assigned_at, last_synced_at, created_at, updated_at
        FROM employee_org_roles
        WHERE employee_id = $1 AND is_active = TRUE
        ORDER BY factory, department, role
        "#,
    )
    .bind(employee_id)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to fetch employee roles: {e}")))?;

    Ok(roles)
}

/// Every role row for an employee regardless of state (test/inspection use).
pub async fn all_roles(
    pool: &PgPool,
    employee_id: Uuid,
) -> Result<Vec<EmployeeOrgRole>, GatewayError> {
    let roles = sqlx::query_as::<_, EmployeeOrgRole>(
        r#"
        SELECT role_id, employee_id, factory, department, role, is_active,
               assigned_at, last_synced_at, created_at, updated_at
        FROM employee_org_roles
        WHERE employee_id = $1
        ORDER BY factory, department, role
        "#,
    )
    .bind(employee_id)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to fetch employee roles: {e}")))?;

    Ok(roles)
}
