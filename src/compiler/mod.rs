//! Resource compiler
//!
//! Pure functions from (AgentCard, AgentPolicy, configuration) to the
//! desired value of each downstream record. Nothing here talks to the API
//! server: the same inputs always yield the same names and payloads, and
//! every call builds fresh metadata.
//!
//! | Record | Name | Owner |
//! |---|---|---|
//! | HTTPRoute | `agent-{card}` | AgentCard |
//! | MCPServerRegistration | `mcp-{card}` | AgentCard |
//! | AuthPolicy | `ap-{card}` | AgentPolicy |
//! | RateLimitPolicy | `rlp-{card}` | AgentPolicy |
//! | ConfigMap | `sidecar-config-{card}` | AgentPolicy |
//! | NetworkPolicy | `egress-{card}` | AgentPolicy |

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::{Resource, ResourceExt};
use serde_json::json;

use crate::config::ControllerConfig;
use crate::crd::{AgentCard, AgentPolicy};
use crate::resources::kuadrant::{AGENT_ACCESS_RULE, AGENT_RATE_LIMIT, JWT_AUTH_RULE};
use crate::resources::mcp::MCP_PATH;
use crate::resources::{
    controller_owner_ref, AuthPolicy, AuthPolicySpec, AuthRules, AuthenticationRule,
    AuthorizationRule, BackendRef, HttpPathMatch, HttpRoute, HttpRouteMatch, HttpRouteRule,
    HttpRouteSpec, JwtAuthentication, Limit, McpServerRegistration, McpServerRegistrationSpec,
    ObjectMeta, ParentRef, PatternExpression, PatternMatching, Rate, RateLimitPolicy,
    RateLimitPolicySpec, RouteTargetRef, SidecarConfig, SIDECAR_CONFIG_KEY,
};
use crate::{Error, Result, LABEL_AGENT_CARD};

/// Window of the generated rate limit
const RATE_LIMIT_WINDOW: &str = "1m";

/// Name of the HTTPRoute generated for a card
pub fn http_route_name(card_name: &str) -> String {
    format!("agent-{card_name}")
}

/// Name of the AuthPolicy generated for a card
pub fn auth_policy_name(card_name: &str) -> String {
    format!("ap-{card_name}")
}

/// Name of the RateLimitPolicy generated for a card
pub fn rate_limit_policy_name(card_name: &str) -> String {
    format!("rlp-{card_name}")
}

/// Name of the sidecar ConfigMap generated for a card
pub fn sidecar_config_name(card_name: &str) -> String {
    format!("sidecar-config-{card_name}")
}

/// Name of the egress NetworkPolicy generated for a card
pub fn egress_policy_name(card_name: &str) -> String {
    format!("egress-{card_name}")
}

/// Name of the MCPServerRegistration generated for a card
pub fn mcp_registration_name(card_name: &str) -> String {
    format!("mcp-{card_name}")
}

/// Name of the Service an agent's route forwards to
pub fn backend_service_name(card_name: &str) -> String {
    format!("{card_name}-svc")
}

/// Expand an allowed-agent entry to a fully-qualified service account subject.
///
/// `namespace/name` keeps its namespace; a bare name is assumed to live in
/// the policy's namespace.
pub fn resolve_service_account(entry: &str, policy_namespace: &str) -> String {
    match entry.split_once('/') {
        Some((namespace, name)) => format!("system:serviceaccount:{namespace}:{name}"),
        None => format!("system:serviceaccount:{policy_namespace}:{entry}"),
    }
}

fn namespace_of<K: Resource>(obj: &K) -> Result<String> {
    obj.namespace().ok_or_else(|| {
        Error::validation(format!("{} has no namespace", obj.name_any()))
    })
}

/// Compiles AgentCards and AgentPolicies into downstream records
pub struct ResourceCompiler<'a> {
    config: &'a ControllerConfig,
}

impl<'a> ResourceCompiler<'a> {
    /// Create a compiler bound to the deployment configuration
    pub fn new(config: &'a ControllerConfig) -> Self {
        Self { config }
    }

    /// HTTPRoute exposing the card's Service at `/agents/{card}` on the shared gateway
    pub fn http_route(&self, card: &AgentCard) -> Result<HttpRoute> {
        let name = card.name_any();
        let metadata = ObjectMeta::new(
            http_route_name(&name),
            namespace_of(card)?,
            &name,
            controller_owner_ref(card)?,
        );

        Ok(HttpRoute::new(
            metadata,
            HttpRouteSpec {
                parent_refs: vec![ParentRef::gateway(
                    &self.config.gateway_name,
                    &self.config.gateway_namespace,
                )],
                rules: vec![HttpRouteRule {
                    matches: vec![HttpRouteMatch {
                        path: Some(HttpPathMatch::prefix(format!("/agents/{name}"))),
                    }],
                    backend_refs: vec![BackendRef {
                        name: backend_service_name(&name),
                        port: card.spec.effective_service_port(),
                    }],
                }],
            },
        ))
    }

    /// MCP gateway registration for an agent that speaks `mcp`
    pub fn mcp_registration(
        &self,
        card: &AgentCard,
        route_name: &str,
    ) -> Result<McpServerRegistration> {
        let name = card.name_any();
        let metadata = ObjectMeta::new(
            mcp_registration_name(&name),
            namespace_of(card)?,
            &name,
            controller_owner_ref(card)?,
        );

        Ok(McpServerRegistration::new(
            metadata,
            McpServerRegistrationSpec {
                target_ref: RouteTargetRef::http_route(route_name),
                tool_prefix: format!("{name}_"),
                path: MCP_PATH.to_string(),
            },
        ))
    }

    /// AuthPolicy admitting JWTs from the configured issuer whose subject is
    /// one of the policy's allowed agents.
    ///
    /// With no allowed agents the authorization rule has no patterns and
    /// admits nobody.
    pub fn auth_policy(
        &self,
        policy: &AgentPolicy,
        card: &AgentCard,
        route_name: &str,
    ) -> Result<AuthPolicy> {
        let policy_namespace = namespace_of(policy)?;
        let card_name = card.name_any();

        let patterns = policy
            .spec
            .ingress
            .iter()
            .flat_map(|ingress| ingress.allowed_agents.iter())
            .map(|entry| {
                PatternExpression::subject_equals(resolve_service_account(
                    entry,
                    &policy_namespace,
                ))
            })
            .collect();

        let metadata = ObjectMeta::new(
            auth_policy_name(&card_name),
            policy_namespace,
            &card_name,
            controller_owner_ref(policy)?,
        );

        Ok(AuthPolicy::new(
            metadata,
            AuthPolicySpec {
                target_ref: RouteTargetRef::http_route(route_name),
                rules: AuthRules {
                    authentication: BTreeMap::from([(
                        JWT_AUTH_RULE.to_string(),
                        AuthenticationRule {
                            jwt: JwtAuthentication {
                                issuer_url: self.config.issuer_url.clone(),
                            },
                        },
                    )]),
                    authorization: BTreeMap::from([(
                        AGENT_ACCESS_RULE.to_string(),
                        AuthorizationRule {
                            pattern_matching: PatternMatching { patterns },
                        },
                    )]),
                },
            },
        ))
    }

    /// RateLimitPolicy with one per-minute rate (60 unless configured)
    pub fn rate_limit_policy(
        &self,
        policy: &AgentPolicy,
        card: &AgentCard,
        route_name: &str,
    ) -> Result<RateLimitPolicy> {
        let card_name = card.name_any();
        let limit = policy
            .spec
            .rate_limit
            .clone()
            .unwrap_or_default()
            .effective_requests_per_minute();

        let metadata = ObjectMeta::new(
            rate_limit_policy_name(&card_name),
            namespace_of(policy)?,
            &card_name,
            controller_owner_ref(policy)?,
        );

        Ok(RateLimitPolicy::new(
            metadata,
            RateLimitPolicySpec {
                target_ref: RouteTargetRef::http_route(route_name),
                limits: BTreeMap::from([(
                    AGENT_RATE_LIMIT.to_string(),
                    Limit {
                        rates: vec![Rate {
                            limit,
                            window: RATE_LIMIT_WINDOW.to_string(),
                        }],
                    },
                )]),
            },
        ))
    }

    /// ConfigMap carrying the sidecar document under `config.yaml`
    pub fn sidecar_config_map(&self, policy: &AgentPolicy, card: &AgentCard) -> Result<ConfigMap> {
        let card_name = card.name_any();
        let card_namespace = namespace_of(card)?;
        let external = policy.spec.external.clone().unwrap_or_default();
        let document =
            SidecarConfig::new(&card_namespace, &policy.spec.agents, &external).to_yaml()?;

        let metadata = ObjectMeta::new(
            sidecar_config_name(&card_name),
            card_namespace,
            &card_name,
            controller_owner_ref(policy)?,
        );

        Ok(ConfigMap {
            metadata: metadata.into_k8s(),
            data: Some(BTreeMap::from([(SIDECAR_CONFIG_KEY.to_string(), document)])),
            ..Default::default()
        })
    }

    /// Egress NetworkPolicy for the card's pods: DNS plus anything in-cluster.
    ///
    /// The shape does not depend on the external rules; per-host decisions
    /// are the sidecar's job.
    pub fn egress_network_policy(
        &self,
        policy: &AgentPolicy,
        card: &AgentCard,
    ) -> Result<NetworkPolicy> {
        let card_name = card.name_any();
        let metadata = ObjectMeta::new(
            egress_policy_name(&card_name),
            namespace_of(card)?,
            &card_name,
            controller_owner_ref(policy)?,
        );

        let pod_labels = BTreeMap::from([(LABEL_AGENT_CARD.to_string(), card_name)]);
        let value = json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "NetworkPolicy",
            "metadata": metadata,
            "spec": {
                "podSelector": { "matchLabels": pod_labels },
                "policyTypes": ["Egress"],
                "egress": [
                    {
                        "ports": [
                            { "protocol": "UDP", "port": 53 },
                            { "protocol": "TCP", "port": 53 }
                        ]
                    },
                    { "to": [ { "namespaceSelector": {} } ] }
                ]
            }
        });
        Ok(serde_json::from_value(value)?)
    }
}
