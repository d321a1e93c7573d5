//! Kuadrant policy types (AuthPolicy, RateLimitPolicy)
//!
//! Both policies attach to an HTTPRoute through `targetRef`. Rule and limit
//! maps are keyed by a fixed name so the same card always produces the same
//! document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::gateway::RouteTargetRef;
use super::{impl_api_defaults, HasApiResource, ObjectMeta};

/// Authentication rule name in generated AuthPolicies
pub const JWT_AUTH_RULE: &str = "jwt-auth";
/// Authorization rule name in generated AuthPolicies
pub const AGENT_ACCESS_RULE: &str = "agent-access";
/// Limit name in generated RateLimitPolicies
pub const AGENT_RATE_LIMIT: &str = "agent-rate-limit";
/// Authorino selector for the authenticated subject
pub const IDENTITY_SUB_SELECTOR: &str = "auth.identity.sub";

// =============================================================================
// AuthPolicy
// =============================================================================

/// Kuadrant AuthPolicy resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicy {
    /// API version (kuadrant.io/v1)
    #[serde(default = "AuthPolicy::default_api_version")]
    pub api_version: String,
    /// Resource kind (AuthPolicy)
    #[serde(default = "AuthPolicy::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// AuthPolicy specification
    pub spec: AuthPolicySpec,
}

impl HasApiResource for AuthPolicy {
    const API_VERSION: &'static str = "kuadrant.io/v1";
    const KIND: &'static str = "AuthPolicy";
}

impl_api_defaults!(AuthPolicy);

impl AuthPolicy {
    /// Create a new AuthPolicy
    pub fn new(metadata: ObjectMeta, spec: AuthPolicySpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// AuthPolicy spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicySpec {
    /// Route this policy protects
    pub target_ref: RouteTargetRef,
    /// Authentication and authorization rules
    pub rules: AuthRules,
}

/// AuthPolicy rule sections
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthRules {
    /// Named authentication methods
    pub authentication: BTreeMap<String, AuthenticationRule>,
    /// Named authorization rules
    pub authorization: BTreeMap<String, AuthorizationRule>,
}

/// One authentication method
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRule {
    /// JWT verification against an OIDC issuer
    pub jwt: JwtAuthentication,
}

/// JWT verification settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthentication {
    /// Issuer whose discovery document provides the signing keys
    pub issuer_url: String,
}

/// One authorization rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRule {
    /// Pattern-matching authorization
    pub pattern_matching: PatternMatching,
}

/// Pattern-matching authorization.
///
/// `patterns` is always serialized, even when empty: an empty list grants
/// nobody.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatternMatching {
    /// Predicates; any match authorizes
    pub patterns: Vec<PatternExpression>,
}

/// Single predicate over the auth pipeline's JSON
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatternExpression {
    /// JSON path into the authorization JSON
    pub selector: String,
    /// Comparison operator (eq, neq, incl, excl, matches)
    pub operator: String,
    /// Value to compare with
    pub value: String,
}

impl PatternExpression {
    /// `auth.identity.sub == subject`
    pub fn subject_equals(subject: impl Into<String>) -> Self {
        Self {
            selector: IDENTITY_SUB_SELECTOR.to_string(),
            operator: "eq".to_string(),
            value: subject.into(),
        }
    }
}

// =============================================================================
// RateLimitPolicy
// =============================================================================

/// Kuadrant RateLimitPolicy resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
    /// API version (kuadrant.io/v1)
    #[serde(default = "RateLimitPolicy::default_api_version")]
    pub api_version: String,
    /// Resource kind (RateLimitPolicy)
    #[serde(default = "RateLimitPolicy::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// RateLimitPolicy specification
    pub spec: RateLimitPolicySpec,
}

impl HasApiResource for RateLimitPolicy {
    const API_VERSION: &'static str = "kuadrant.io/v1";
    const KIND: &'static str = "RateLimitPolicy";
}

impl_api_defaults!(RateLimitPolicy);

impl RateLimitPolicy {
    /// Create a new RateLimitPolicy
    pub fn new(metadata: ObjectMeta, spec: RateLimitPolicySpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// RateLimitPolicy spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicySpec {
    /// Route this policy limits
    pub target_ref: RouteTargetRef,
    /// Named limits
    pub limits: BTreeMap<String, Limit>,
}

/// One named limit
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Limit {
    /// Rate windows
    pub rates: Vec<Rate>,
}

/// Requests allowed per window
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rate {
    /// Request count
    pub limit: u32,
    /// Window duration (e.g., "1m")
    pub window: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta::new(name, "agents", "weather", OwnerReference::default())
    }

    #[test]
    fn empty_patterns_are_serialized() {
        let policy = AuthPolicy::new(
            meta("ap-weather"),
            AuthPolicySpec {
                target_ref: RouteTargetRef::http_route("agent-weather"),
                rules: AuthRules {
                    authentication: BTreeMap::new(),
                    authorization: BTreeMap::from([(
                        AGENT_ACCESS_RULE.to_string(),
                        AuthorizationRule {
                            pattern_matching: PatternMatching { patterns: vec![] },
                        },
                    )]),
                },
            },
        );

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(
            json["spec"]["rules"]["authorization"]["agent-access"]["patternMatching"]["patterns"],
            serde_json::json!([])
        );
        assert_eq!(json["apiVersion"], "kuadrant.io/v1");
    }

    #[test]
    fn rate_limit_policy_shape() {
        let rlp = RateLimitPolicy::new(
            meta("rlp-weather"),
            RateLimitPolicySpec {
                target_ref: RouteTargetRef::http_route("agent-weather"),
                limits: BTreeMap::from([(
                    AGENT_RATE_LIMIT.to_string(),
                    Limit {
                        rates: vec![Rate {
                            limit: 60,
                            window: "1m".to_string(),
                        }],
                    },
                )]),
            },
        );

        let json = serde_json::to_value(&rlp).unwrap();
        assert_eq!(json["kind"], "RateLimitPolicy");
        assert_eq!(json["spec"]["targetRef"]["kind"], "HTTPRoute");
        assert_eq!(
            json["spec"]["limits"]["agent-rate-limit"]["rates"][0]["window"],
            "1m"
        );
    }
}
