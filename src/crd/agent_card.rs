//! AgentCard Custom Resource Definition
//!
//! An AgentCard describes one agent's identity: the skills it offers, the
//! protocols it speaks, and the port its Service listens on. The card
//! controller turns it into an HTTPRoute on the shared gateway and, for MCP
//! agents, an MCPServerRegistration.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::{DEFAULT_SERVICE_PORT, MCP_PROTOCOL};

/// A named capability an agent provides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct AgentSkill {
    /// Skill identifier
    pub name: String,
    /// Human-readable explanation of the skill
    #[serde(default)]
    pub description: String,
}

/// Specification for an AgentCard
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kagenti.com",
    version = "v1alpha1",
    kind = "AgentCard",
    plural = "agentcards",
    shortname = "ac",
    status = "AgentCardStatus",
    namespaced,
    printcolumn = r#"{"name":"Description","type":"string","jsonPath":".spec.description"}"#,
    printcolumn = r#"{"name":"Protocols","type":"string","jsonPath":".spec.protocols"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AgentCardSpec {
    /// Human-readable description of the agent
    #[serde(default)]
    pub description: String,

    /// Capabilities this agent provides, in declaration order
    #[serde(default)]
    pub skills: Vec<AgentSkill>,

    /// Communication protocols the agent supports (a2a, mcp, rest)
    #[schemars(length(min = 1))]
    pub protocols: Vec<String>,

    /// Port the agent's Service listens on (0 or unset means 8080)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<i32>,
}

impl AgentCardSpec {
    /// Backend port for the generated route
    pub fn effective_service_port(&self) -> i32 {
        match self.service_port {
            Some(port) if port > 0 => port,
            _ => DEFAULT_SERVICE_PORT,
        }
    }

    /// Whether the agent speaks the given protocol
    pub fn supports(&self, protocol: &str) -> bool {
        self.protocols.iter().any(|p| p == protocol)
    }

    /// Whether the agent should be registered with the MCP gateway
    pub fn is_mcp(&self) -> bool {
        self.supports(MCP_PROTOCOL)
    }
}

/// Observed state of an AgentCard
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCardStatus {
    /// Latest observations of the card's state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Name of the HTTPRoute generated for this card
    #[serde(
        default,
        rename = "generatedHTTPRoute",
        skip_serializing_if = "Option::is_none"
    )]
    pub generated_http_route: Option<String>,
}
