//! Token claims, the organization tree they embed, and the request principal.
//!
//! Claims arrive from the identity provider with a deeply nested
//! `organization` structure (factories -> departments -> roles). The raw
//! claim value is normalized once at the trust boundary
//! (`common::claims`), parsed into a typed [`OrganizationTree`], and the
//! flat [`Principal`] derived from it is what every downstream consumer
//! sees. Principals are immutable; propagation replaces, never mutates.
//!
//! Factory and department names are kept as received but compared
//! trimmed and case-insensitively everywhere.

use common::claims::{normalize_structured_claim, string_list};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Validated token claims.
///
/// The `sub` field contains the user identifier and is redacted in Debug
/// output to prevent exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity provider user id) - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Email address, when the token carries one.
    #[serde(default)]
    pub email: Option<String>,

    /// Display name, when the token carries one.
    #[serde(default)]
    pub name: Option<String>,

    /// Group memberships. Kept as a raw value: encoders disagree on the
    /// element types, so extraction filters to strings.
    #[serde(default)]
    pub groups: Option<Value>,

    /// Nested organization structure. Kept as a raw value until
    /// normalization; may be an object or a JSON-encoded string.
    #[serde(default)]
    pub organization: Option<Value>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("has_organization", &self.organization.is_some())
            .finish()
    }
}

impl Claims {
    /// Group memberships as strings, dropping non-string members.
    #[must_use]
    pub fn group_list(&self) -> Vec<String> {
        self.groups.as_ref().map(|v| string_list(v)).unwrap_or_default()
    }

    /// Parse the organization claim into a typed tree.
    ///
    /// Missing or malformed organization data yields an empty tree, never
    /// an error: downstream permission checks fail closed on it.
    #[must_use]
    pub fn organization_tree(&self) -> OrganizationTree {
        self.organization
            .as_ref()
            .and_then(normalize_structured_claim)
            .map(|v| OrganizationTree::from_value(&v))
            .unwrap_or_default()
    }
}

/// Normalize an organization name for comparison or persistence-key use.
///
/// Names are case-sensitive as received from the identity provider but
/// MUST be compared trimmed and case-insensitively.
#[must_use]
pub fn normalized_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A department node: an ordered list of role names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DepartmentNode {
    pub roles: Vec<String>,
}

/// A factory node: departments keyed by name as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FactoryNode {
    pub departments: BTreeMap<String, DepartmentNode>,
}

impl FactoryNode {
    /// Look up a department, trimmed and case-insensitive.
    #[must_use]
    pub fn department(&self, name: &str) -> Option<&DepartmentNode> {
        let wanted = normalized_name(name);
        self.departments
            .iter()
            .find(|(dept_name, _)| normalized_name(dept_name) == wanted)
            .map(|(_, node)| node)
    }
}

/// The token-embedded organization structure, read-only to the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrganizationTree {
    pub factories: BTreeMap<String, FactoryNode>,
}

impl OrganizationTree {
    /// Build a tree from a normalized organization claim value.
    ///
    /// Malformed branches (a factory without an object body, departments
    /// that are not a map, a roles entry that is not a list) are skipped,
    /// not fatal: one bad branch must not cost the principal the rest of
    /// its permissions.
    #[must_use]
    pub fn from_value(organization: &Value) -> Self {
        let mut tree = OrganizationTree::default();

        let Some(factories) = organization.get("factories").and_then(Value::as_object) else {
            tracing::debug!(target: "gw.auth.claims", "Organization claim has no factories map");
            return tree;
        };

        for (factory_name, factory_value) in factories {
            let Some(factory_obj) = factory_value.as_object() else {
                tracing::warn!(
                    target: "gw.auth.claims",
                    factory = %factory_name,
                    "Skipping factory with non-object body"
                );
                continue;
            };

            let mut factory_node = FactoryNode::default();
            let departments = factory_obj.get("departments").and_then(Value::as_object);

            if let Some(departments) = departments {
                for (dept_name, dept_value) in departments {
                    let Some(dept_obj) = dept_value.as_object() else {
                        tracing::warn!(
                            target: "gw.auth.claims",
                            factory = %factory_name,
                            department = %dept_name,
                            "Skipping department with non-object body"
                        );
                        continue;
                    };

                    let roles = dept_obj
                        .get("roles")
                        .map(string_list)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty())
                        .collect();

                    factory_node
                        .departments
                        .insert(dept_name.clone(), DepartmentNode { roles });
                }
            }

            tree.factories.insert(factory_name.clone(), factory_node);
        }

        tree
    }

    /// Whether the tree contains a factory, trimmed and case-insensitive.
    #[must_use]
    pub fn contains_factory(&self, name: &str) -> bool {
        self.factory(name).is_some()
    }

    /// Look up a factory node, trimmed and case-insensitive.
    #[must_use]
    pub fn factory(&self, name: &str) -> Option<&FactoryNode> {
        let wanted = normalized_name(name);
        self.factories
            .iter()
            .find(|(factory_name, _)| normalized_name(factory_name) == wanted)
            .map(|(_, node)| node)
    }

    /// Factory names as received, in deterministic (sorted) order.
    #[must_use]
    pub fn factory_names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// The request-scoped identity derived from validated claims.
///
/// Lifetime is one request: rebuilt from cache or fresh validation each
/// time, never mutated, only replaced. `factory_names` is always present
/// (empty when the token has no organization) so downstream consumers
/// never need a nil check.
#[derive(Clone, Serialize)]
pub struct Principal {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub groups: Vec<String>,
    pub organization: OrganizationTree,
    pub factory_names: Vec<String>,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("user_id", &"[REDACTED]")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("groups", &self.groups)
            .field("factory_names", &self.factory_names)
            .finish()
    }
}

impl Principal {
    /// Derive a principal from validated claims.
    #[must_use]
    pub fn from_claims(claims: &Claims) -> Self {
        let organization = claims.organization_tree();
        let factory_names = organization.factory_names();

        Principal {
            user_id: claims.sub.clone(),
            email: claims.email.clone().unwrap_or_default(),
            name: claims.name.clone().unwrap_or_default(),
            groups: claims.group_list(),
            organization,
            factory_names,
        }
    }
}

/// Identity data from the provider's userinfo endpoint, used by the
/// organization synchronizer on the login/callback path.
#[derive(Clone)]
pub struct IdentityProfile {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub groups: Vec<String>,
    /// Workday identifier, when present in the organization claim.
    pub workday_id: Option<String>,
    /// National id-card number, when present in the organization claim.
    pub national_id: Option<String>,
    pub organization: OrganizationTree,
}

impl fmt::Debug for IdentityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityProfile")
            .field("sub", &"[REDACTED]")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("has_workday_id", &self.workday_id.is_some())
            .finish()
    }
}

impl IdentityProfile {
    /// Build a profile from a userinfo response body.
    ///
    /// Returns `None` when the response has no usable subject.
    #[must_use]
    pub fn from_userinfo(body: &Value) -> Option<Self> {
        let sub = body.get("sub").and_then(Value::as_str)?.to_string();
        if sub.is_empty() {
            return None;
        }

        let organization_value = body
            .get("organization")
            .and_then(normalize_structured_claim);

        let string_field = |value: Option<&Value>, key: &str| {
            value
                .and_then(|v| v.get(key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        };

        Some(IdentityProfile {
            sub,
            email: body
                .get("email")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            name: body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            groups: body.get("groups").map(string_list).unwrap_or_default(),
            workday_id: string_field(organization_value.as_ref(), "workday_id"),
            national_id: string_field(organization_value.as_ref(), "idn"),
            organization: organization_value
                .as_ref()
                .map(OrganizationTree::from_value)
                .unwrap_or_default(),
        })
    }

    /// First word of the display name.
    #[must_use]
    pub fn first_name(&self) -> String {
        self.name
            .split_whitespace()
            .next()
            .unwrap_or(&self.name)
            .to_string()
    }

    /// Last word of the display name, empty for single-word names.
    #[must_use]
    pub fn last_name(&self) -> String {
        let words: Vec<&str> = self.name.split_whitespace().collect();
        if words.len() > 1 {
            words.last().map(ToString::to_string).unwrap_or_default()
        } else {
            String::new()
        }
    }
}
