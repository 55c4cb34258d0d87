//! Employee repository module for database operations.
//!
//! Provides lookup and update operations for employee records created and
//! maintained by the login synchronization path.
//!
//! # Security
//!
//! - All queries use parameterized statements (SQL injection safe)
//! - The login update only ever re-asserts `active = TRUE` when the caller
//!   confirmed, from a fresh read, that the account was already active;
//!   a disabled account is left untouched

use crate::errors::GatewayError;
use crate::models::Employee;
use sqlx::PgPool;
use uuid::Uuid;

const EMPLOYEE_COLUMNS: &str = r#"
    employee_id, subject_id, email, first_name, last_name,
    workday_id, national_id, active, external, hire_date,
    created_at, updated_at
"#;

/// New employee payload for first-login creation.
#[derive(Debug, Clone)]
pub struct NewEmployee {
    pub subject_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub workday_id: Option<String>,
    pub national_id: Option<String>,
}

/// Field updates applied to an existing employee on login.
///
/// `None` fields are left unchanged. `reassert_active` must be computed
/// from a fresh read of the row's current `active` value, immediately
/// before the update: the update sets `active = TRUE` only when it is
/// `true`, and leaves the column untouched otherwise.
#[derive(Debug, Clone, Default)]
pub struct EmployeeLoginUpdate {
    pub subject_id: Option<String>,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub workday_id: Option<String>,
    pub national_id: Option<String>,
    pub reassert_active: bool,
}

/// Get an employee by identity-provider subject.
pub async fn find_by_subject(
    pool: &PgPool,
    subject_id: &str,
) -> Result<Option<Employee>, GatewayError> {
    let employee = sqlx::query_as::<_, Employee>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE subject_id = $1"
    ))
    .bind(subject_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to fetch employee by subject: {e}")))?;

    Ok(employee)
}

/// Get an employee by email (case-insensitive).
pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Employee>, GatewayError> {
    let employee = sqlx::query_as::<_, Employee>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE LOWER(email) = LOWER($1)"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to fetch employee by email: {e}")))?;

    Ok(employee)
}

/// Get an employee by workday id.
pub async fn find_by_workday_id(
    pool: &PgPool,
    workday_id: &str,
) -> Result<Option<Employee>, GatewayError> {
    let employee = sqlx::query_as::<_, Employee>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE workday_id = $1"
    ))
    .bind(workday_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to fetch employee by workday id: {e}")))?;

    Ok(employee)
}

/// Employee lookup for the per-request account-active gate.
///
/// Tries the identity-provider subject first, falling back to email for
/// records created before the subject was known.
pub async fn find_current_user_info(
    pool: &PgPool,
    subject_or_email: &str,
) -> Result<Option<Employee>, GatewayError> {
    if let Some(employee) = find_by_subject(pool, subject_or_email).await? {
        return Ok(Some(employee));
    }
    find_by_email(pool, subject_or_email).await
}

/// Fresh read of an employee's current `active` value.
///
/// The sync path calls this immediately before computing an update, to
/// close the race window against concurrent administrative disablement;
/// the in-memory copy used for matching is never trusted for this.
pub async fn fetch_active(pool: &PgPool, employee_id: Uuid) -> Result<Option<bool>, GatewayError> {
    let row: Option<(bool,)> =
        sqlx::query_as("SELECT active FROM employees WHERE employee_id = $1")
            .bind(employee_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                GatewayError::Database(format!("Failed to read employee active flag: {e}"))
            })?;

    Ok(row.map(|(active,)| active))
}

/// Create a new employee on first login. New accounts start active.
pub async fn create(pool: &PgPool, new: &NewEmployee) -> Result<Employee, GatewayError> {
    let employee = sqlx::query_as::<_, Employee>(&format!(
        r#"
        INSERT INTO employees (subject_id, email, first_name, last_name, workday_id, national_id, active, external)
        VALUES ($1, $2, $3, $4, $5, $6, TRUE, FALSE)
        RETURNING {EMPLOYEE_COLUMNS}
        "#
    ))
    .bind(&new.subject_id)
    .bind(&new.email)
    .bind(&new.first_name)
    .bind(&new.last_name)
    .bind(&new.workday_id)
    .bind(&new.national_id)
    .fetch_one(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to create employee: {e}")))?;

    Ok(employee)
}

/// Whether a database error is the workday-id uniqueness violation raised
/// when two records race to claim the same workday id.
#[must_use]
pub fn is_workday_id_conflict(err: &GatewayError) -> bool {
    match err {
        GatewayError::Database(msg) => {
            msg.contains("employees_workday_id_unique") || msg.contains("23505")
        }
        _ => false,
    }
}

/// Apply a login update to an existing employee.
///
/// `active` is re-asserted to TRUE only when `update.reassert_active` is
/// set; otherwise the column keeps its current value.
pub async fn apply_login_update(
    pool: &PgPool,
    employee_id: Uuid,
    update: &EmployeeLoginUpdate,
) -> Result<Employee, GatewayError> {
    let employee = sqlx::query_as::<_, Employee>(&format!(
        r#"
        UPDATE employees SET
            subject_id = COALESCE($2, subject_id),
            email = COALESCE($3, email),
            first_name = $4,
            last_name = $5,
            workday_id = COALESCE($6, workday_id),
            national_id = COALESCE($7, national_id),
            active = CASE WHEN $8 THEN TRUE ELSE active END,
            updated_at = NOW()
        WHERE employee_id = $1
        RETURNING {EMPLOYEE_COLUMNS}
        "#
    ))
    .bind(employee_id)
    .bind(&update.subject_id)
    .bind(&update.email)
    .bind(&update.first_name)
    .bind(&update.last_name)
    .bind(&update.workday_id)
    .bind(&update.national_id)
    .bind(update.reassert_active)
    .fetch_one(pool)
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to update employee: {e}")))?;

    Ok(employee)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_new(subject: &str, email: &str) -> NewEmployee {
        NewEmployee {
            subject_id: subject.to_string(),
            email: email.to_string(),
            first_name: "Pat".to_string(),
            last_name: "Doe".to_string(),
            workday_id: Some("WD-1".to_string()),
            national_id: None,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_create_and_find(pool: PgPool) -> Result<(), GatewayError> {
        let created = create(&pool, &sample_new("sub-1", "pat@example.com")).await?;
        assert!(created.active);
        assert!(!created.external);

        let by_subject = find_by_subject(&pool, "sub-1").await?.unwrap();
        assert_eq!(by_subject.employee_id, created.employee_id);

        let by_email = find_by_email(&pool, "PAT@EXAMPLE.COM").await?.unwrap();
        assert_eq!(by_email.employee_id, created.employee_id);

        let by_workday = find_by_workday_id(&pool, "WD-1").await?.unwrap();
        assert_eq!(by_workday.employee_id, created.employee_id);

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_find_current_user_info_falls_back_to_email(
        pool: PgPool,
    ) -> Result<(), GatewayError> {
        // Record without a subject id (pre-provisioned from HR import)
        sqlx::query("INSERT INTO employees (email, first_name, last_name) VALUES ($1, 'Pat', 'Doe')")
            .bind("pat@example.com")
            .execute(&pool)
            .await?;

        let found = find_current_user_info(&pool, "pat@example.com").await?;
        assert!(found.is_some());

        let missing = find_current_user_info(&pool, "nobody@example.com").await?;
        assert!(missing.is_none());

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_duplicate_workday_id_is_detectable(pool: PgPool) -> Result<(), GatewayError> {
        create(&pool, &sample_new("sub-1", "one@example.com")).await?;

        let result = create(&pool, &sample_new("sub-2", "two@example.com")).await;
        let err = result.unwrap_err();
        assert!(is_workday_id_conflict(&err), "got: {err:?}");

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_fetch_active_fresh_read(pool: PgPool) -> Result<(), GatewayError> {
        let created = create(&pool, &sample_new("sub-1", "pat@example.com")).await?;
        assert_eq!(fetch_active(&pool, created.employee_id).await?, Some(true));

        sqlx::query("UPDATE employees SET active = FALSE WHERE employee_id = $1")
            .bind(created.employee_id)
            .execute(&pool)
            .await?;

        assert_eq!(fetch_active(&pool, created.employee_id).await?, Some(false));
        assert_eq!(fetch_active(&pool, Uuid::new_v4()).await?, None);

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_login_update_does_not_reactivate_disabled_account(
        pool: PgPool,
    ) -> Result<(), GatewayError> {
        let created = create(&pool, &sample_new("sub-1", "pat@example.com")).await?;

        // Administrative disablement
        sqlx::query("UPDATE employees SET active = FALSE WHERE employee_id = $1")
            .bind(created.employee_id)
            .execute(&pool)
            .await?;

        let update = EmployeeLoginUpdate {
            first_name: "Pat".to_string(),
            last_name: "Doe".to_string(),
            reassert_active: false,
            ..EmployeeLoginUpdate::default()
        };

        let updated = apply_login_update(&pool, created.employee_id, &update).await?;
        assert!(!updated.active, "disabled account must stay disabled");

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_login_update_reasserts_active_and_merges_fields(
        pool: PgPool,
    ) -> Result<(), GatewayError> {
        let created = create(
            &pool,
            &NewEmployee {
                subject_id: "sub-1".to_string(),
                email: "pat@example.com".to_string(),
                first_name: "Pat".to_string(),
                last_name: "Doe".to_string(),
                workday_id: None,
                national_id: None,
            },
        )
        .await?;

        let update = EmployeeLoginUpdate {
            subject_id: None,
            email: None,
            first_name: "Patricia".to_string(),
            last_name: "Doe".to_string(),
            workday_id: Some("WD-9".to_string()),
            national_id: Some("X123".to_string()),
            reassert_active: true,
        };

        let updated = apply_login_update(&pool, created.employee_id, &update).await?;

        assert!(updated.active);
        assert_eq!(updated.first_name, "Patricia");
        assert_eq!(updated.email, "pat@example.com", "None leaves email unchanged");
        assert_eq!(updated.workday_id.as_deref(), Some("WD-9"));
        assert_eq!(updated.national_id.as_deref(), Some("X123"));

        Ok(())
    }
}
