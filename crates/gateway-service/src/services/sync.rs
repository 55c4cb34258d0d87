//! Organization synchronizer.
//!
//! Reconciles the token's organization tree into the normalized relational
//! model, once per successful login/callback. Idempotent: a repeat sync
//! with an unchanged tree yields the same employee row and the same active
//! role set.
//!
//! # The active-flag invariant
//!
//! Every branch that updates an existing employee first re-reads the row's
//! current `active` value directly from the store - not from the in-memory
//! copy used for matching - immediately before computing the update. The
//! update re-asserts `active = TRUE` only when that fresh read was already
//! `true`; a disabled account stays disabled through any number of logins.
//!
//! # Role reconciliation
//!
//! Reference entities (factories, departments, junctions, assignments) are
//! ensured outside the transaction; they are idempotent and a failure in
//! one branch must not abort its siblings. The role mutations themselves -
//! deactivate-all, reactivate-or-insert, batch insert, retention purge -
//! run in a single transaction so partial role sets are never observably
//! persisted.

use crate::auth::claims::{IdentityProfile, OrganizationTree};
use crate::errors::GatewayError;
use crate::models::{Employee, RoleTriple};
use crate::observability::metrics;
use crate::repositories::{employees, org_roles, org_units};
use crate::repositories::employees::{EmployeeLoginUpdate, NewEmployee};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Outcome counters for one role reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSyncSummary {
    /// Triples present in the token (after branch failures were skipped).
    pub total_roles: usize,
    /// Triples inserted as new rows.
    pub new_roles: usize,
    /// Rows flipped to inactive at the start of the run.
    pub deactivated: u64,
    /// Rows hard-deleted after the retention window.
    pub purged: u64,
}

/// Synchronize an employee record from identity-provider data, then
/// reconcile their roles.
///
/// Resolution order: provider subject -> email -> workday id -> create.
///
/// # Errors
///
/// A role-sync transaction failure surfaces here and fails the login; the
/// employee row changes themselves are not rolled back (they are
/// idempotent on the next attempt).
#[instrument(skip_all, fields(email = %profile.email))]
pub async fn sync_user(
    pool: &PgPool,
    profile: &IdentityProfile,
) -> Result<Employee, GatewayError> {
    let started = Instant::now();

    let result = resolve_and_update_employee(pool, profile).await;
    let employee = match result {
        Ok(employee) => employee,
        Err(e) => {
            metrics::record_user_sync("error", started.elapsed());
            return Err(e);
        }
    };

    if let Err(e) = sync_roles(pool, employee.employee_id, &profile.organization).await {
        metrics::record_user_sync("error", started.elapsed());
        return Err(e);
    }

    metrics::record_user_sync("success", started.elapsed());
    tracing::info!(
        target: "gw.services.sync",
        employee_id = %employee.employee_id,
        email = %employee.email,
        "Employee synchronized"
    );

    Ok(employee)
}

async fn resolve_and_update_employee(
    pool: &PgPool,
    profile: &IdentityProfile,
) -> Result<Employee, GatewayError> {
    // 1. Match by provider subject (primary external key)
    if let Some(existing) = employees::find_by_subject(pool, &profile.sub).await? {
        tracing::debug!(
            target: "gw.services.sync",
            employee_id = %existing.employee_id,
            "Employee matched by subject"
        );
        return update_matched_employee(pool, &existing, profile, MatchedBy::Subject).await;
    }

    // 2. Match by email
    if let Some(existing) = employees::find_by_email(pool, &profile.email).await? {
        tracing::info!(
            target: "gw.services.sync",
            employee_id = %existing.employee_id,
            "Employee matched by email, attaching provider subject"
        );
        return update_matched_employee(pool, &existing, profile, MatchedBy::Email).await;
    }

    // 3. Match by workday id
    if let Some(workday_id) = profile.workday_id.as_deref() {
        if let Some(existing) = employees::find_by_workday_id(pool, workday_id).await? {
            tracing::info!(
                target: "gw.services.sync",
                employee_id = %existing.employee_id,
                "Employee matched by workday id, attaching provider subject"
            );
            return update_matched_employee(pool, &existing, profile, MatchedBy::WorkdayId).await;
        }
    }

    // 4. Create new
    let created = employees::create(
        pool,
        &NewEmployee {
            subject_id: profile.sub.clone(),
            email: profile.email.clone(),
            first_name: profile.first_name(),
            last_name: profile.last_name(),
            workday_id: profile.workday_id.clone(),
            national_id: profile.national_id.clone(),
        },
    )
    .await;

    match created {
        Ok(employee) => {
            tracing::info!(
                target: "gw.services.sync",
                employee_id = %employee.employee_id,
                email = %employee.email,
                "New employee created from identity provider"
            );
            Ok(employee)
        }
        Err(e) if employees::is_workday_id_conflict(&e) => {
            // Lost a creation race on the workday id: the row exists now,
            // re-resolve and update it instead.
            let workday_id = profile.workday_id.as_deref().unwrap_or_default();
            tracing::warn!(
                target: "gw.services.sync",
                "Workday id conflict on create, updating existing employee"
            );
            let existing = employees::find_by_workday_id(pool, workday_id)
                .await?
                .ok_or(e)?;
            update_matched_employee(pool, &existing, profile, MatchedBy::WorkdayId).await
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchedBy {
    Subject,
    Email,
    WorkdayId,
}

async fn update_matched_employee(
    pool: &PgPool,
    existing: &Employee,
    profile: &IdentityProfile,
    matched_by: MatchedBy,
) -> Result<Employee, GatewayError> {
    // Fresh read of the active flag, never the in-memory copy: an
    // administrator may have disabled the account since the match query.
    let was_active = employees::fetch_active(pool, existing.employee_id)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(
                target: "gw.services.sync",
                employee_id = %existing.employee_id,
                error = %e,
                "Failed to re-read active status, treating as disabled"
            );
            Some(false)
        })
        .unwrap_or(false);

    if !was_active {
        tracing::warn!(
            target: "gw.services.sync",
            employee_id = %existing.employee_id,
            "Account is disabled, sync leaves the active flag untouched"
        );
    }

    let missing = |current: &Option<String>| {
        current
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .is_none()
    };

    let update = EmployeeLoginUpdate {
        // The subject is attached when the match came through a secondary key
        subject_id: match matched_by {
            MatchedBy::Subject => None,
            MatchedBy::Email | MatchedBy::WorkdayId => Some(profile.sub.clone()),
        },
        email: match matched_by {
            // Matched on email: the column is already right
            MatchedBy::Email => None,
            _ if profile.email.is_empty() => None,
            _ => Some(profile.email.clone()),
        },
        first_name: profile.first_name(),
        last_name: profile.last_name(),
        // Provider-correctable ids are only filled in when absent
        workday_id: if missing(&existing.workday_id) {
            profile.workday_id.clone()
        } else {
            None
        },
        national_id: if missing(&existing.national_id) {
            profile.national_id.clone()
        } else {
            None
        },
        reassert_active: was_active,
    };

    employees::apply_login_update(pool, existing.employee_id, &update).await
}

/// Reconcile the employee's role rows against the organization tree.
///
/// Implemented as a set-difference over case-folded triples: the
/// deactivate-all / reactivate-or-insert sequence makes role removal
/// observable as `is_active = FALSE` without losing assignment history
/// inside the retention window.
///
/// # Errors
///
/// Only a database/transaction error fails the run. A persistence failure
/// for one factory/department branch is logged and that branch skipped;
/// sibling branches still sync.
#[instrument(skip_all, fields(employee_id = %employee_id))]
pub async fn sync_roles(
    pool: &PgPool,
    employee_id: Uuid,
    organization: &OrganizationTree,
) -> Result<RoleSyncSummary, GatewayError> {
    let now = Utc::now();

    if organization.is_empty() {
        tracing::warn!(
            target: "gw.services.sync",
            "Token carries no organization branches, all roles will deactivate"
        );
    }

    // Resolve reference entities branch by branch, outside the role
    // transaction. Triples whose branch failed are skipped, not fatal.
    let mut desired: BTreeMap<(String, String, String), RoleTriple> = BTreeMap::new();

    for (factory_name, factory) in &organization.factories {
        for (dept_name, dept) in &factory.departments {
            if dept.roles.is_empty() {
                tracing::debug!(
                    target: "gw.services.sync",
                    factory = %factory_name,
                    department = %dept_name,
                    "Department has no roles, skipping"
                );
                continue;
            }

            let junction_id =
                match org_units::ensure_factory_and_department(pool, factory_name, dept_name)
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::error!(
                            target: "gw.services.sync",
                            factory = %factory_name,
                            department = %dept_name,
                            error = %e,
                            "Failed to ensure factory/department, skipping branch"
                        );
                        continue;
                    }
                };

            if let Err(e) =
                org_units::ensure_employee_assignment(pool, employee_id, junction_id).await
            {
                // Assignment bookkeeping is best-effort; the roles still sync
                tracing::warn!(
                    target: "gw.services.sync",
                    factory = %factory_name,
                    department = %dept_name,
                    error = %e,
                    "Failed to ensure employee assignment"
                );
            }

            for role in &dept.roles {
                let triple = RoleTriple {
                    factory: factory_name.clone(),
                    department: dept_name.clone(),
                    role: role.clone(),
                };
                desired.insert(triple.key(), triple);
            }
        }
    }

    // All role mutations commit or none do.
    let mut tx = pool.begin().await?;

    let deactivated = org_roles::deactivate_all(&mut *tx, employee_id, now).await?;

    let mut to_insert = Vec::new();
    for triple in desired.values() {
        if !org_roles::reactivate(&mut *tx, employee_id, triple, now).await? {
            to_insert.push(triple.clone());
        }
    }

    org_roles::insert_batch(&mut *tx, employee_id, &to_insert, now).await?;

    let cutoff = now - Duration::days(org_roles::INACTIVE_ROLE_RETENTION_DAYS);
    let purged = org_roles::purge_inactive_before(&mut *tx, employee_id, cutoff).await?;

    tx.commit().await?;

    let summary = RoleSyncSummary {
        total_roles: desired.len(),
        new_roles: to_insert.len(),
        deactivated,
        purged,
    };

    tracing::info!(
        target: "gw.services.sync",
        total_roles = summary.total_roles,
        new_roles = summary.new_roles,
        deactivated = summary.deactivated,
        purged = summary.purged,
        "Roles synchronized"
    );

    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(sub: &str, email: &str, factories: serde_json::Value) -> IdentityProfile {
        IdentityProfile::from_userinfo(&json!({
            "sub": sub,
            "email": email,
            "name": "Pat Doe",
            "groups": ["mes-users"],
            "organization": {
                "workday_id": "WD-100",
                "idn": "X555",
                "factories": factories
            }
        }))
        .expect("profile")
    }

    fn quality_operator() -> serde_json::Value {
        json!({
            "Plant North": {
                "departments": {
                    "Quality": { "roles": ["operator"] }
                }
            }
        })
    }

    async fn active_triples(pool: &PgPool, employee_id: Uuid) -> Vec<(String, String, String)> {
        org_roles::active_roles(pool, employee_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.factory, r.department, r.role))
            .collect()
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_first_login_creates_employee_and_roles(
        pool: PgPool,
    ) -> Result<(), GatewayError> {
        let employee = sync_user(&pool, &profile("sub-1", "pat@example.com", quality_operator()))
            .await?;

        assert_eq!(employee.subject_id.as_deref(), Some("sub-1"));
        assert_eq!(employee.workday_id.as_deref(), Some("WD-100"));
        assert_eq!(employee.national_id.as_deref(), Some("X555"));
        assert!(employee.active);

        assert_eq!(
            active_triples(&pool, employee.employee_id).await,
            vec![(
                "Plant North".to_string(),
                "Quality".to_string(),
                "operator".to_string()
            )]
        );

        // Factory, department, junction and assignment rows exist
        let assignments: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM employee_factory_departments WHERE employee_id = $1",
        )
        .bind(employee.employee_id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(assignments.0, 1);

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_sync_user_is_idempotent(pool: PgPool) -> Result<(), GatewayError> {
        let p = profile("sub-1", "pat@example.com", quality_operator());

        let first = sync_user(&pool, &p).await?;
        let second = sync_user(&pool, &p).await?;

        assert_eq!(first.employee_id, second.employee_id);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM employees")
            .fetch_one(&pool)
            .await?;
        assert_eq!(count.0, 1, "no duplicate employee row");

        // Same active role set, and still exactly one row for the triple
        assert_eq!(
            active_triples(&pool, second.employee_id).await,
            vec![(
                "Plant North".to_string(),
                "Quality".to_string(),
                "operator".to_string()
            )]
        );
        let role_count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM employee_org_roles WHERE employee_id = $1")
                .bind(second.employee_id)
                .fetch_one(&pool)
                .await?;
        assert_eq!(role_count.0, 1);

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_match_by_email_attaches_subject(pool: PgPool) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO employees (email, first_name, last_name) VALUES ('pat@example.com', 'P', 'D')",
        )
        .execute(&pool)
        .await?;

        let employee = sync_user(&pool, &profile("sub-9", "pat@example.com", quality_operator()))
            .await?;

        assert_eq!(employee.subject_id.as_deref(), Some("sub-9"));
        assert_eq!(employee.first_name, "Pat");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM employees")
            .fetch_one(&pool)
            .await?;
        assert_eq!(count.0, 1);

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_match_by_workday_id_attaches_subject_and_email(
        pool: PgPool,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO employees (email, workday_id) VALUES ('old@example.com', 'WD-100')",
        )
        .execute(&pool)
        .await?;

        let employee = sync_user(&pool, &profile("sub-9", "new@example.com", quality_operator()))
            .await?;

        assert_eq!(employee.subject_id.as_deref(), Some("sub-9"));
        assert_eq!(employee.email, "new@example.com");
        assert_eq!(employee.workday_id.as_deref(), Some("WD-100"));

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_disabled_account_stays_disabled_through_sync(
        pool: PgPool,
    ) -> Result<(), GatewayError> {
        let p = profile("sub-1", "pat@example.com", quality_operator());
        let employee = sync_user(&pool, &p).await?;

        // Administrative disablement between logins
        sqlx::query("UPDATE employees SET active = FALSE WHERE employee_id = $1")
            .bind(employee.employee_id)
            .execute(&pool)
            .await?;

        let after = sync_user(&pool, &p).await?;
        assert!(
            !after.active,
            "sync must never reactivate a disabled account"
        );

        // And again, for good measure
        let again = sync_user(&pool, &p).await?;
        assert!(!again.active);

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_role_removal_deactivates_then_purges(
        pool: PgPool,
    ) -> Result<(), GatewayError> {
        let with_two = profile(
            "sub-1",
            "pat@example.com",
            json!({
                "Plant North": {
                    "departments": {
                        "Quality": { "roles": ["operator", "inspector"] }
                    }
                }
            }),
        );
        let employee = sync_user(&pool, &with_two).await?;

        // Second sync omits "inspector": the row deactivates, it does not
        // disappear.
        let with_one = profile("sub-1", "pat@example.com", quality_operator());
        let summary = sync_roles(&pool, employee.employee_id, &with_one.organization).await?;
        assert_eq!(summary.total_roles, 1);
        assert_eq!(summary.new_roles, 0);
        assert_eq!(summary.purged, 0);

        let all = org_roles::all_roles(&pool, employee.employee_id).await?;
        assert_eq!(all.len(), 2);
        let inspector = all.iter().find(|r| r.role == "inspector").unwrap();
        assert!(!inspector.is_active);

        // Backdate the inactive row past the retention window; the next
        // sync hard-deletes it.
        sqlx::query(
            "UPDATE employee_org_roles SET last_synced_at = NOW() - INTERVAL '31 days' \
             WHERE employee_id = $1 AND role = 'inspector'",
        )
        .bind(employee.employee_id)
        .execute(&pool)
        .await?;

        let summary = sync_roles(&pool, employee.employee_id, &with_one.organization).await?;
        assert_eq!(summary.purged, 1);

        let remaining = org_roles::all_roles(&pool, employee.employee_id).await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.first().unwrap().role, "operator");

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_empty_tree_deactivates_all_roles(pool: PgPool) -> Result<(), GatewayError> {
        let employee = sync_user(&pool, &profile("sub-1", "pat@example.com", quality_operator()))
            .await?;
        assert_eq!(active_triples(&pool, employee.employee_id).await.len(), 1);

        let summary =
            sync_roles(&pool, employee.employee_id, &OrganizationTree::default()).await?;
        assert_eq!(summary.total_roles, 0);
        assert_eq!(summary.deactivated, 1);

        assert!(active_triples(&pool, employee.employee_id).await.is_empty());

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_case_variant_triples_do_not_duplicate(
        pool: PgPool,
    ) -> Result<(), GatewayError> {
        let employee = sync_user(&pool, &profile("sub-1", "pat@example.com", quality_operator()))
            .await?;

        // Same triple, different casing from the provider
        let recased = profile(
            "sub-1",
            "pat@example.com",
            json!({
                "PLANT NORTH": {
                    "departments": {
                        "quality": { "roles": ["Operator"] }
                    }
                }
            }),
        );
        sync_roles(&pool, employee.employee_id, &recased.organization).await?;

        let all = org_roles::all_roles(&pool, employee.employee_id).await?;
        assert_eq!(all.len(), 1, "case variants reuse the existing row");
        assert!(all.first().unwrap().is_active);

        // And the factory table did not grow a duplicate either
        let factories: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM factories")
            .fetch_one(&pool)
            .await?;
        assert_eq!(factories.0, 1);

        Ok(())
    }
}
