//! AgentPolicy Custom Resource Definition
//!
//! An AgentPolicy selects AgentCards in its namespace by label and declares
//! who may call them (ingress), how fast (rate limit), and how their sidecar
//! reaches other agents and external hosts.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::DEFAULT_REQUESTS_PER_MINUTE;

/// Label-equality selector over AgentCards
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSelector {
    /// Labels a card must carry (all of them, with equal values)
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Who may call the selected agents
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressRules {
    /// Service accounts allowed to call, as `name` or `namespace/name`
    #[serde(default)]
    pub allowed_agents: Vec<String>,

    /// End users allowed to call ("*" means any)
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

/// How the sidecar treats traffic to an external host
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExternalMode {
    /// Inject a credential read from Vault
    Vault,
    /// Exchange the caller's token for one scoped to the target audience
    Exchange,
    /// Forward untouched
    Passthrough,
    /// Block
    #[default]
    Deny,
}

/// Per-host egress rule for the sidecar
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRule {
    /// Destination host
    pub host: String,

    /// Treatment for this host
    pub mode: ExternalMode,

    /// Vault secret path (vault mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_path: Option<String>,

    /// Token audience (exchange mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    /// Token scopes (exchange mode)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Header carrying the injected credential
    #[serde(default = "default_header", skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,

    /// Prefix written before the credential value
    #[serde(
        default = "default_header_prefix",
        skip_serializing_if = "Option::is_none"
    )]
    pub header_prefix: Option<String>,
}

fn default_header() -> Option<String> {
    Some("Authorization".to_string())
}

fn default_header_prefix() -> Option<String> {
    Some("Bearer ".to_string())
}

/// External egress rules for the selected agents' sidecars
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRules {
    /// Treatment for hosts no rule names
    #[serde(default)]
    pub default_mode: ExternalMode,

    /// Ordered per-host rules
    #[serde(default)]
    pub rules: Vec<ExternalRule>,
}

/// Request rate ceiling per selected agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    /// Requests per minute (0 or unset means 60)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
}

impl RateLimit {
    /// Effective limit after defaulting
    pub fn effective_requests_per_minute(&self) -> u32 {
        match self.requests_per_minute {
            Some(rpm) if rpm > 0 => rpm,
            _ => DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

/// Specification for an AgentPolicy
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kagenti.com",
    version = "v1alpha1",
    kind = "AgentPolicy",
    plural = "agentpolicies",
    shortname = "apol",
    status = "AgentPolicyStatus",
    namespaced,
    printcolumn = r#"{"name":"Matched","type":"integer","jsonPath":".status.matchedAgentCards"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AgentPolicySpec {
    /// Which AgentCards in this namespace the policy governs
    #[serde(default)]
    pub agent_selector: AgentSelector,

    /// Inbound access rules; generates an AuthPolicy per card
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressRules>,

    /// Agents the selected agents may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,

    /// External egress rules; generates the sidecar config and egress NetworkPolicy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalRules>,

    /// Rate limit; generates a RateLimitPolicy per card
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

/// Reference to a record the policy generated
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct GeneratedResource {
    /// Kind of the generated record
    pub kind: String,
    /// Name of the generated record
    pub name: String,
}

impl GeneratedResource {
    /// Create a reference
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Observed state of an AgentPolicy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPolicyStatus {
    /// Number of AgentCards matched on the last pass
    #[serde(default)]
    pub matched_agent_cards: i32,

    /// Records generated on the last pass
    #[serde(default)]
    pub generated_resources: Vec<GeneratedResource>,

    /// Latest observations of the policy's state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
