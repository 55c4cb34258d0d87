//! Pure permission evaluation over a principal's organization tree.
//!
//! Side-effect free predicates used by route guards and the permissions
//! endpoints. Everything here operates on the normalized
//! [`OrganizationTree`] and the principal's group list; no I/O, no locks.
//!
//! Factory and department comparisons are trimmed and case-insensitive.
//! Role names are compared exactly (trimmed at tree construction).

use crate::auth::claims::{normalized_name, OrganizationTree};
use serde::Serialize;
use std::collections::BTreeSet;

/// Distinguished factory token denoting unrestricted organization-wide
/// access. Wherever it appears in a principal's factory list it
/// short-circuits per-factory filtering.
pub const WILDCARD_FACTORY: &str = "CX";

/// Permission requirements for a route or an ad-hoc check.
#[derive(Debug, Clone, Default)]
pub struct PermissionConfig {
    /// Required groups; the principal must hold at least one when non-empty.
    pub groups: Vec<String>,

    /// Required factory access.
    pub factory: Option<String>,

    /// Department used to scope the role lookup.
    pub department: Option<String>,

    /// Required roles, evaluated under `match_any`.
    pub roles: Vec<String>,

    /// If true any one of `roles` suffices; otherwise all are required.
    pub match_any: bool,
}

impl PermissionConfig {
    fn factory_requirement(&self) -> Option<&str> {
        self.factory
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    fn department_requirement(&self) -> Option<&str> {
        self.department
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// Outcome of a permission check with collected failure reasons.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reasons: Vec<String>,
}

/// Whether the principal's tree carries the wildcard factory.
#[must_use]
pub fn has_wildcard_access(organization: &OrganizationTree) -> bool {
    let wildcard = normalized_name(WILDCARD_FACTORY);
    organization
        .factories
        .keys()
        .any(|name| normalized_name(name) == wildcard)
}

/// True iff the normalized factory name is a key in the tree, or the tree
/// carries the wildcard factory.
#[must_use]
pub fn has_factory_access(organization: &OrganizationTree, factory: &str) -> bool {
    has_wildcard_access(organization) || organization.contains_factory(factory)
}

/// Collect the principal's roles under the given factory/department scope.
///
/// - No factory: union of roles across all factories (scoped to the given
///   department within each factory when one is named).
/// - Factory without department: union across that factory's departments.
/// - Factory and department: exact lookup.
///
/// A principal holding the wildcard factory falls back to the
/// cross-factory union when the named factory is absent from its tree.
#[must_use]
pub fn roles_for(
    organization: &OrganizationTree,
    factory: Option<&str>,
    department: Option<&str>,
) -> BTreeSet<String> {
    match factory {
        Some(factory_name) => match organization.factory(factory_name) {
            Some(node) => roles_in_factory(node, department),
            None if has_wildcard_access(organization) => union_roles(organization, department),
            None => BTreeSet::new(),
        },
        None => union_roles(organization, department),
    }
}

fn union_roles(organization: &OrganizationTree, department: Option<&str>) -> BTreeSet<String> {
    organization
        .factories
        .values()
        .flat_map(|factory| roles_in_factory(factory, department))
        .collect()
}

fn roles_in_factory(
    factory: &crate::auth::claims::FactoryNode,
    department: Option<&str>,
) -> BTreeSet<String> {
    match department {
        Some(dept_name) => factory
            .department(dept_name)
            .map(|dept| dept.roles.iter().cloned().collect())
            .unwrap_or_default(),
        None => factory
            .departments
            .values()
            .flat_map(|dept| dept.roles.iter().cloned())
            .collect(),
    }
}

/// Every (factory, department, role) triple in the tree, in tree order.
#[must_use]
pub fn all_role_triples(organization: &OrganizationTree) -> Vec<(String, String, String)> {
    let mut triples = Vec::new();
    for (factory_name, factory) in &organization.factories {
        for (dept_name, dept) in &factory.departments {
            for role in &dept.roles {
                triples.push((factory_name.clone(), dept_name.clone(), role.clone()));
            }
        }
    }
    triples
}

/// Evaluate a permission configuration against a principal.
///
/// Evaluation order: groups first (the principal must hold at least one
/// listed group if any are required), then factory access, then roles
/// under the any/all policy. All failing reasons are collected for
/// diagnostics rather than short-circuiting. A config with only a group
/// requirement is satisfied once the group check passes.
#[must_use]
pub fn check_permission(
    organization: &OrganizationTree,
    groups: &[String],
    config: &PermissionConfig,
) -> PermissionDecision {
    let mut reasons = Vec::new();

    if !config.groups.is_empty() {
        let has_any_group = config
            .groups
            .iter()
            .any(|required| groups.iter().any(|held| held == required));
        if !has_any_group {
            reasons.push(format!(
                "user is not in any of the required groups: {}",
                config.groups.join(", ")
            ));
        }
    }

    let factory = config.factory_requirement();
    let department = config.department_requirement();

    // Group-only configs are decided by the group check alone.
    if factory.is_none() && department.is_none() && config.roles.is_empty() {
        return PermissionDecision {
            allowed: reasons.is_empty(),
            reasons,
        };
    }

    if let Some(factory_name) = factory {
        if !has_factory_access(organization, factory_name) {
            reasons.push(format!("no access to factory: {factory_name}"));
        }
    }

    if !config.roles.is_empty() {
        let held_roles = roles_for(organization, factory, department);

        if config.match_any {
            let has_any_role = config.roles.iter().any(|r| held_roles.contains(r));
            if !has_any_role {
                reasons.push(format!(
                    "user holds none of the required roles: {}",
                    config.roles.join(", ")
                ));
            }
        } else {
            for required in &config.roles {
                if !held_roles.contains(required) {
                    reasons.push(format!("missing required role: {required}"));
                }
            }
        }
    }

    PermissionDecision {
        allowed: reasons.is_empty(),
        reasons,
    }
}
