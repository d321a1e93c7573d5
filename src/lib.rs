//! Agent access control - compiles agent identity and policy records into
//! gateway, auth, rate-limit, egress and sidecar configuration
//!
//! Two records drive everything. An AgentCard describes one agent; an
//! AgentPolicy selects cards by label and states who may call them, whom
//! they may call and how often. The controllers recompute every derived
//! record from scratch on each pass and write only what changed.
//!
//! # Modules
//!
//! - [`crd`] - AgentCard and AgentPolicy Custom Resource Definitions
//! - [`selector`] - Label-equality selector matching
//! - [`resources`] - Typed payloads of the downstream records
//! - [`compiler`] - Pure synthesis of downstream records
//! - [`registry`] - Which downstream kinds this cluster serves
//! - [`apply`] - Create-or-update with semantic diff, degradation classifier
//! - [`controller`] - AgentCard and AgentPolicy reconcilers
//! - [`index`] - AgentCard to AgentPolicy mapping for watches
//! - [`runner`] - Controller wiring
//! - [`kube_client`] - Mockable Kubernetes API boundary
//! - [`leader_election`] - Lease-based leader election
//! - [`health`] - Liveness and readiness probes
//! - [`metrics`] - Prometheus reconcile metrics
//! - [`config`] - Deployment configuration
//! - [`telemetry`] - Log subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod apply;
pub mod compiler;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod health;
pub mod index;
pub mod kube_client;
pub mod leader_election;
pub mod metrics;
pub mod registry;
pub mod resources;
pub mod runner;
pub mod selector;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;

// =============================================================================
// Labels and identifiers
// =============================================================================

/// Label marking records this controller generated
pub const LABEL_MANAGED_BY: &str = "kagenti.com/managed-by";

/// Label naming the AgentCard a generated record belongs to
pub const LABEL_AGENT_CARD: &str = "kagenti.com/agent-card";

/// Value of [`LABEL_MANAGED_BY`]
pub const MANAGED_BY_VALUE: &str = "agent-access-control";

/// Finalizer placed on AgentCards
pub const AGENT_CARD_FINALIZER: &str = "kagenti.com/agentcard-finalizer";

/// Finalizer placed on AgentPolicies
pub const AGENT_POLICY_FINALIZER: &str = "kagenti.com/agentpolicy-finalizer";

/// Field manager for every write
pub const FIELD_MANAGER: &str = "agent-access-control";

/// Name of the leader election Lease
pub const LEADER_ELECTION_ID: &str = "agent-access-control.kagenti.github.com";

// =============================================================================
// Defaults
// =============================================================================

/// Backend port when a card does not set one
pub const DEFAULT_SERVICE_PORT: i32 = 8080;

/// Rate limit when a policy does not set one
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

/// Protocol that triggers MCP gateway registration
pub const MCP_PROTOCOL: &str = "mcp";

/// JWT issuer when none is configured
pub const DEFAULT_ISSUER_URL: &str = "https://issuer.example.com";
