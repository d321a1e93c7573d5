//! Cross-record index from AgentCards to the AgentPolicies selecting them
//!
//! The policy controller watches AgentCards so that a new or relabelled card
//! is protected without waiting for the policy to change. This mapper
//! answers which policies a card event should wake up, reading the policy
//! controller's reflector store.

use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

use crate::crd::{AgentCard, AgentPolicy};

/// Policies in the card's namespace whose selector matches the card's labels
pub fn policies_for_card<'a, I>(card: &AgentCard, policies: I) -> Vec<ObjectRef<AgentPolicy>>
where
    I: IntoIterator<Item = &'a AgentPolicy>,
{
    let Some(namespace) = card.namespace() else {
        return Vec::new();
    };
    policies
        .into_iter()
        .filter(|policy| policy.namespace().as_deref() == Some(namespace.as_str()))
        .filter(|policy| policy.spec.agent_selector.matches(card.labels()))
        .map(ObjectRef::from_obj)
        .collect()
}
