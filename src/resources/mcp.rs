//! MCP gateway registration type

use serde::{Deserialize, Serialize};

use super::gateway::RouteTargetRef;
use super::{impl_api_defaults, HasApiResource, ObjectMeta};

/// Path MCP agents serve their tool endpoint on
pub const MCP_PATH: &str = "/mcp";

/// Registers an agent's MCP endpoint with the MCP gateway
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerRegistration {
    /// API version (mcp.kagenti.com/v1alpha1)
    #[serde(default = "McpServerRegistration::default_api_version")]
    pub api_version: String,
    /// Resource kind (MCPServerRegistration)
    #[serde(default = "McpServerRegistration::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Registration specification
    pub spec: McpServerRegistrationSpec,
}

impl HasApiResource for McpServerRegistration {
    const API_VERSION: &'static str = "mcp.kagenti.com/v1alpha1";
    const KIND: &'static str = "MCPServerRegistration";
}

impl_api_defaults!(McpServerRegistration);

impl McpServerRegistration {
    /// Create a new registration
    pub fn new(metadata: ObjectMeta, spec: McpServerRegistrationSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// Registration spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerRegistrationSpec {
    /// Route the gateway forwards tool calls through
    pub target_ref: RouteTargetRef,
    /// Prefix prepended to every tool name the agent exposes
    pub tool_prefix: String,
    /// Path of the MCP endpoint behind the route
    pub path: String,
}
