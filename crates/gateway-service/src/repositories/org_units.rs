//! Factory / department reference-entity repository.
//!
//! Factories and departments are deduplicated by case-folded name and
//! auto-created the first time a token mentions them. Creation is
//! idempotent (`ON CONFLICT` on the case-folded name) so concurrent logins
//! converge on one row.
//!
//! Factory-to-asset linkage goes through a static code table with a
//! same-name fallback and is best-effort: a factory with no matching asset
//! row is still created, just unlinked.

use crate::errors::GatewayError;
use crate::models::{Asset, Department, Factory, FactoryDepartment};
use sqlx::PgPool;
use uuid::Uuid;

/// Static factory-name to asset-code table.
///
/// Known plant codes map to themselves; anything else falls back to using
/// the factory name as the asset code.
const FACTORY_ASSET_CODES: &[(&str, &str)] = &[
    ("CXC", "CXC"),
    ("CXM", "CXM"),
    ("CXB", "CXB"),
    ("CXD", "CXD"),
    ("CXE", "CXE"),
    ("CXF", "CXF"),
    ("EXT", "EXT"),
    ("FPC", "FPC"),
    ("FPL", "FPL"),
    ("FSP", "FSP"),
    ("MNT", "MNT"),
    ("RTP", "RTP"),
    ("ITC", "ITC"),
];

/// Resolve the asset code for a factory name (same-name fallback).
#[must_use]
pub fn factory_asset_code(factory_name: &str) -> &str {
    FACTORY_ASSET_CODES
        .iter()
        .find(|(name, _)| *name == factory_name)
        .map_or(factory_name, |(_, code)| code)
}

/// Generate a short department code from its name ("Quality" -> "QUAL").
#[must_use]
pub fn department_code(department_name: &str) -> String {
    department_name.chars().take(4).collect::<String>().to_uppercase()
}

/// Look up an asset by code.
pub async fn find_asset_by_code(
    pool: &PgPool,
    code: &str,
) -> Result<Option<Asset>, GatewayError> {
    let asset = sqlx::query_as::<_, Asset>(
        "SELECT asset_id, code, description, created_at FROM assets WHERE code = $1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to fetch asset by code: {e}")))?;

    Ok(asset)
}

/// Get or create a factory by name (case-insensitive).
///
/// On first sight the factory is linked to the asset resolved through the
/// static code table; an unresolvable asset leaves the linkage NULL.
pub async fn get_or_create_factory(
    pool: &PgPool,
    factory_name: &str,
) -> Result<Factory, GatewayError> {
    if let Some(factory) = sqlx::query_as::<_, Factory>(
        r#"
        SELECT factory_id, name, asset_id, asset_code, active, created_at, updated_at
        FROM factories
        WHERE LOWER(name) = LOWER($1)
        "#,
    )
    .bind(factory_name)
    .fetch_optional(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to fetch factory: {e}")))?
    {
        return Ok(factory);
    }

    // Best-effort asset mapping on first sight
    let asset = find_asset_by_code(pool, factory_asset_code(factory_name)).await?;
    if asset.is_none() {
        tracing::debug!(
            target: "gw.repo.org_units",
            factory = %factory_name,
            "No asset row matches this factory, creating unlinked"
        );
    }

    let factory = sqlx::query_as::<_, Factory>(
        r#"
        INSERT INTO factories (name, asset_id, asset_code)
        VALUES ($1, $2, $3)
        ON CONFLICT ((LOWER(name))) DO UPDATE SET updated_at = NOW()
        RETURNING factory_id, name, asset_id, asset_code, active, created_at, updated_at
        "#,
    )
    .bind(factory_name)
    .bind(asset.as_ref().map(|a| a.asset_id))
    .bind(asset.as_ref().map(|a| a.code.clone()))
    .fetch_one(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to create factory: {e}")))?;

    tracing::info!(
        target: "gw.repo.org_units",
        factory = %factory_name,
        linked_asset = factory.asset_code.as_deref().unwrap_or("none"),
        "Factory created"
    );

    Ok(factory)
}

/// Get or create a department by name (case-insensitive).
pub async fn get_or_create_department(
    pool: &PgPool,
    department_name: &str,
) -> Result<Department, GatewayError> {
    if let Some(department) = sqlx::query_as::<_, Department>(
        r#"
        SELECT department_id, name, code, description, active, created_at, updated_at
        FROM departments
        WHERE LOWER(name) = LOWER($1)
        "#,
    )
    .bind(department_name)
    .fetch_optional(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to fetch department: {e}")))?
    {
        return Ok(department);
    }

    let department = sqlx::query_as::<_, Department>(
        r#"
        INSERT INTO departments (name, code, description)
        VALUES ($1, $2, $3)
        ON CONFLICT ((LOWER(name))) DO UPDATE SET updated_at = NOW()
        RETURNING department_id, name, code, description, active, created_at, updated_at
        "#,
    )
    .bind(department_name)
    .bind(department_code(department_name))
    .bind(format!(
        "Department {department_name} - created from identity provider data"
    ))
    .fetch_one(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to create department: {e}")))?;

    tracing::info!(
        target: "gw.repo.org_units",
        department = %department_name,
        "Department created"
    );

    Ok(department)
}

/// Get or create the factory/department junction row.
pub async fn get_or_create_factory_department(
    pool: &PgPool,
    factory_id: Uuid,
    department_id: Uuid,
) -> Result<FactoryDepartment, GatewayError> {
    let junction = sqlx::query_as::<_, FactoryDepartment>(
        r#"
        INSERT INTO factory_departments (factory_id, department_id)
        VALUES ($1, $2)
        ON CONFLICT (factory_id, department_id) DO UPDATE SET updated_at = NOW()
        RETURNING factory_department_id, factory_id, department_id, active, created_at, updated_at
        "#,
    )
    .bind(factory_id)
    .bind(department_id)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        GatewayError::Database(format!("Failed to ensure factory-department relation: {e}"))
    })?;

    Ok(junction)
}

/// Ensure the factory and department exist and return the junction row id.
pub async fn ensure_factory_and_department(
    pool: &PgPool,
    factory_name: &str,
    department_name: &str,
) -> Result<Uuid, GatewayError> {
    let factory = get_or_create_factory(pool, factory_name).await?;
    let department = get_or_create_department(pool, department_name).await?;
    let junction =
        get_or_create_factory_department(pool, factory.factory_id, department.department_id)
            .await?;
    Ok(junction.factory_department_id)
}

/// Ensure the employee-to-factory-department assignment exists.
///
/// Assignments are created on demand and never deleted by this path.
pub async fn ensure_employee_assignment(
    pool: &PgPool,
    employee_id: Uuid,
    factory_department_id: Uuid,
) -> Result<(), GatewayError> {
    sqlx::query(
        r#"
        INSERT INTO employee_factory_departments (employee_id, factory_department_id)
        VALUES ($1, $2)
        ON CONFLICT (employee_id, factory_department_id) DO NOTHING
        "#,
    )
    .bind(employee_id)
    .bind(factory_department_id)
    .execute(pool)
    .await
    .map_err(|e| {
        GatewayError::Database(format!("Failed to ensure employee assignment: {e}"))
    })?;

    Ok(())
}
