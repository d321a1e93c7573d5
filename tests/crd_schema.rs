//! Checks on the generated CustomResourceDefinitions
//!
//! These are what `--crd` prints and what gets installed, so names and
//! subresources must stay stable across releases.

use agent_access_control::crd::{AgentCard, AgentPolicy};
use kube::CustomResourceExt;

#[test]
fn agent_card_crd_names() {
    let crd = AgentCard::crd();
    assert_eq!(crd.metadata.name.as_deref(), Some("agentcards.kagenti.com"));
    assert_eq!(crd.spec.group, "kagenti.com");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.names.kind, "AgentCard");
    assert_eq!(crd.spec.names.plural, "agentcards");
    assert_eq!(crd.spec.names.short_names, Some(vec!["ac".to_string()]));
}

#[test]
fn agent_policy_crd_names() {
    let crd = AgentPolicy::crd();
    assert_eq!(crd.metadata.name.as_deref(), Some("agentpolicies.kagenti.com"));
    assert_eq!(crd.spec.names.kind, "AgentPolicy");
    assert_eq!(crd.spec.names.plural, "agentpolicies");
    assert_eq!(crd.spec.names.short_names, Some(vec!["apol".to_string()]));
}

#[test]
fn both_crds_serve_v1alpha1_with_status_subresource() {
    for crd in [AgentCard::crd(), AgentPolicy::crd()] {
        assert_eq!(crd.spec.versions.len(), 1);
        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1alpha1");
        assert!(version.served && version.storage);
        let subresources = version.subresources.as_ref().expect("subresources");
        assert!(subresources.status.is_some());
    }
}

#[test]
fn agent_card_schema_requires_protocols() {
    let crd = AgentCard::crd();
    let schema = serde_json::to_value(&crd.spec.versions[0].schema).unwrap();
    let spec = &schema["openAPIV3Schema"]["properties"]["spec"];
    let required: Vec<&str> = spec["required"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(required.contains(&"protocols"));
    assert_eq!(spec["properties"]["protocols"]["minItems"], 1);
}

#[test]
fn agent_policy_printer_columns_show_matches() {
    let crd = AgentPolicy::crd();
    let columns = crd.spec.versions[0]
        .additional_printer_columns
        .as_ref()
        .expect("printer columns");
    assert!(columns
        .iter()
        .any(|c| c.name == "Matched" && c.json_path == ".status.matchedAgentCards"));
}
