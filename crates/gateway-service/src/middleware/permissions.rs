//! Permission guards for protected routes.
//!
//! Thin middleware wrappers over the pure evaluator in
//! `auth::permissions`: they read the [`Principal`] propagated by the auth
//! middleware and deny with 403 (reasons included) when the configured
//! requirements are not met.
//!
//! Routes attach a guard with a closure over its config:
//!
//! ```rust,ignore
//! use axum::middleware::from_fn;
//!
//! let config = require_factory_role("CXC", "supervisor");
//! router.route_layer(from_fn(move |req, next| {
//!     guard(config.clone(), req, next)
//! }));
//! ```

use crate::auth::claims::Principal;
use crate::auth::permissions::{check_permission, PermissionConfig};
use crate::errors::GatewayError;
use crate::observability::metrics;
use axum::{extract::Request, middleware::Next, response::Response};

/// Evaluate a permission config against the request's principal.
///
/// Fails with `Unauthenticated` when no principal was propagated (auth
/// middleware missing or bypassed) and `Forbidden` with the collected
/// reasons when the check denies.
pub fn evaluate(config: &PermissionConfig, req: &Request) -> Result<(), GatewayError> {
    let principal = req
        .extensions()
        .get::<Principal>()
        .ok_or(GatewayError::Unauthenticated)?;

    let decision = check_permission(&principal.organization, &principal.groups, config);
    metrics::record_permission_check(decision.allowed);

    if decision.allowed {
        Ok(())
    } else {
        tracing::debug!(
            target: "gw.middleware.permissions",
            reasons = ?decision.reasons,
            "Permission denied"
        );
        Err(GatewayError::Forbidden(decision.reasons.join("; ")))
    }
}

/// Middleware entry point; pair with `axum::middleware::from_fn` and a
/// closure capturing the config.
pub async fn guard(
    config: PermissionConfig,
    req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    evaluate(&config, &req)?;
    Ok(next.run(req).await)
}

/// Require membership in a group.
#[must_use]
pub fn require_group(group: &str) -> PermissionConfig {
    PermissionConfig {
        groups: vec![group.to_string()],
        ..PermissionConfig::default()
    }
}

/// Require access to a factory.
#[must_use]
pub fn require_factory(factory: &str) -> PermissionConfig {
    PermissionConfig {
        factory: Some(factory.to_string()),
        ..PermissionConfig::default()
    }
}

/// Require a role held anywhere in the organization.
#[must_use]
pub fn require_role(role: &str) -> PermissionConfig {
    PermissionConfig {
        roles: vec![role.to_string()],
        match_any: true,
        ..PermissionConfig::default()
    }
}

/// Require factory access and a role within that factory.
#[must_use]
pub fn require_factory_role(factory: &str, role: &str) -> PermissionConfig {
    PermissionConfig {
        factory: Some(factory.to_string()),
        roles: vec![role.to_string()],
        match_any: false,
        ..PermissionConfig::default()
    }
}

/// Require factory access and a role within a specific department.
#[must_use]
pub fn require_factory_department_role(
    factory: &str,
    department: &str,
    role: &str,
) -> PermissionConfig {
    PermissionConfig {
        factory: Some(factory.to_string()),
        department: Some(department.to_string()),
        roles: vec![role.to_string()],
        match_any: false,
        ..PermissionConfig::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::claims::{Claims, Principal};
    use axum::body::Body;
    use serde_json::json;

    fn request_with_principal(organization: serde_json::Value, groups: Vec<&str>) -> Request {
        let claims = Claims {
            sub: "user-1".to_string(),
            exp: 2_000_000_000,
            iat: 1_700_000_000,
            email: None,
            name: None,
            groups: Some(json!(groups)),
            organization: Some(organization),
        };
        let principal = Principal::from_claims(&claims);

        let mut req = Request::builder().uri("/v1/anything").body(Body::empty()).unwrap();
        req.extensions_mut().insert(principal);
        req
    }

    fn quality_operator_org() -> serde_json::Value {
        json!({
            "factories": {
                "F1": { "departments": { "Quality": { "roles": ["operator"] } } }
            }
        })
    }

    #[test]
    fn test_evaluate_allows_matching_principal() {
        let req = request_with_principal(quality_operator_org(), vec![]);
        let config = require_factory_role("F1", "operator");

        assert!(evaluate(&config, &req).is_ok());
    }

    #[test]
    fn test_evaluate_denies_with_reasons() {
        let req = request_with_principal(quality_operator_org(), vec![]);
        let config = require_factory_role("F2", "operator");

        let err = evaluate(&config, &req).unwrap_err();
        match err {
            GatewayError::Forbidden(reasons) => {
                assert!(reasons.contains("no access to factory: F2"));
            }
            other => panic!("expected Forbidden, got {other:?}"),
        }
    }

    #[test]
    fn test_evaluate_without_principal_is_unauthenticated() {
        let req = Request::builder().uri("/v1/x").body(Body::empty()).unwrap();
        let config = require_group("mes-admins");

        assert!(matches!(
            evaluate(&config, &req),
            Err(GatewayError::Unauthenticated)
        ));
    }

    #[test]
    fn test_require_group_builder() {
        let req = request_with_principal(json!(null), vec!["mes-admins"]);
        assert!(evaluate(&require_group("mes-admins"), &req).is_ok());
        assert!(evaluate(&require_group("other"), &req).is_err());
    }

    #[test]
    fn test_require_role_anywhere() {
        let req = request_with_principal(quality_operator_org(), vec![]);
        assert!(evaluate(&require_role("operator"), &req).is_ok());
        assert!(evaluate(&require_role("supervisor"), &req).is_err());
    }
}
