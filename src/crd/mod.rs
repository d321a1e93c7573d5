//! Custom Resource Definitions for agent access control
//!
//! This module contains the two records the controller watches.

mod agent_card;
mod agent_policy;
mod types;

pub use agent_card::{AgentCard, AgentCardSpec, AgentCardStatus, AgentSkill};
pub use agent_policy::{
    AgentPolicy, AgentPolicySpec, AgentPolicyStatus, AgentSelector, ExternalMode, ExternalRule,
    ExternalRules, GeneratedResource, IngressRules, RateLimit,
};
pub use types::{set_condition, Condition, ConditionStatus, CONDITION_READY};
