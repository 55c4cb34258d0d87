//! Permission introspection endpoints.
//!
//! Read-only views over the propagated principal for frontends that
//! build their navigation from the user's factories, departments and
//! roles, plus an ad-hoc check endpoint mirroring the route guards.

use crate::auth::claims::Principal;
use crate::auth::permissions::{all_role_triples, check_permission, PermissionConfig};
use crate::observability::metrics;
use axum::{extract::Query, Extension, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub name: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RoleTripleView {
    pub factory: String,
    pub department: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct PermissionsView {
    pub factories: Vec<String>,
    pub departments: Vec<String>,
    pub roles: Vec<String>,
    pub all_roles: Vec<RoleTripleView>,
    pub has_access: bool,
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub user: UserSummary,
    pub permissions: PermissionsView,
}

/// Handler for GET /v1/me/permissions
///
/// The principal's factories, unique departments and roles, and the full
/// (factory, department, role) triple list. `has_access` is false for a
/// principal without both a factory and at least one role.
#[instrument(skip_all, name = "gw.handlers.permissions")]
pub async fn get_permissions(
    Extension(principal): Extension<Principal>,
) -> Json<PermissionsResponse> {
    let triples = all_role_triples(&principal.organization);

    let departments: BTreeSet<String> = triples.iter().map(|(_, d, _)| d.clone()).collect();
    let roles: BTreeSet<String> = triples.iter().map(|(_, _, r)| r.clone()).collect();

    let has_access = !principal.factory_names.is_empty() && !roles.is_empty();

    Json(PermissionsResponse {
        user: UserSummary {
            id: principal.user_id,
            email: principal.email,
            name: principal.name,
            groups: principal.groups,
        },
        permissions: PermissionsView {
            factories: principal.factory_names,
            departments: departments.into_iter().collect(),
            roles: roles.into_iter().collect(),
            all_roles: triples
                .into_iter()
                .map(|(factory, department, role)| RoleTripleView {
                    factory,
                    department,
                    role,
                })
                .collect(),
            has_access,
        },
    })
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckedRequirements {
    pub factory: Option<String>,
    pub department: Option<String>,
    pub role: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckPermissionResponse {
    pub has_permission: bool,
    pub reasons: Vec<String>,
    pub checked: CheckedRequirements,
}

/// Handler for GET /v1/me/permissions/check
///
/// Ad-hoc permission probe over query parameters; reasons list every
/// failing requirement.
#[instrument(skip_all, name = "gw.handlers.permissions_check")]
pub async fn check_permission_query(
    Extension(principal): Extension<Principal>,
    Query(query): Query<CheckQuery>,
) -> Json<CheckPermissionResponse> {
    let config = PermissionConfig {
        groups: query.group.clone().into_iter().collect(),
        factory: query.factory.clone(),
        department: query.department.clone(),
        roles: query.role.clone().into_iter().collect(),
        match_any: true,
    };

    let decision = check_permission(&principal.organization, &principal.groups, &config);
    metrics::record_permission_check(decision.allowed);

    Json(CheckPermissionResponse {
        has_permission: decision.allowed,
        reasons: decision.reasons,
        checked: CheckedRequirements {
            factory: query.factory,
            department: query.department,
            role: query.role,
            group: query.group,
        },
    })
}
