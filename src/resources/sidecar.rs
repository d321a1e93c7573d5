//! Sidecar proxy configuration document
//!
//! The sidecar reads this YAML from the `config.yaml` key of the generated
//! ConfigMap. Each external rule carries only the fields its mode uses.

use serde::{Deserialize, Serialize};

use crate::crd::{ExternalMode, ExternalRule, ExternalRules};
use crate::Result;

/// ConfigMap key holding the serialized document
pub const SIDECAR_CONFIG_KEY: &str = "config.yaml";

/// Sidecar configuration document
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarConfig {
    /// In-cluster agent gateway the sidecar forwards agent calls to
    pub gateway: SidecarGateway,
    /// Agents this agent may call
    pub allowed_agents: Vec<String>,
    /// External host handling
    pub external: SidecarExternal,
}

/// Agent gateway endpoint
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarGateway {
    /// Gateway host
    pub host: String,
    /// Forwarding mode
    pub mode: ExternalMode,
}

/// External host handling
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarExternal {
    /// Ordered per-host rules
    pub rules: Vec<SidecarRule>,
    /// Treatment for hosts no rule names
    pub default_mode: ExternalMode,
}

/// Per-host rule as the sidecar consumes it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarRule {
    /// Destination host
    pub host: String,
    /// Treatment
    pub mode: ExternalMode,
    /// Vault secret path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_path: Option<String>,
    /// Token audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Token scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Credential header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Credential prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_prefix: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

impl From<&ExternalRule> for SidecarRule {
    fn from(rule: &ExternalRule) -> Self {
        let injects = matches!(rule.mode, ExternalMode::Vault | ExternalMode::Exchange);
        let exchange = rule.mode == ExternalMode::Exchange;
        Self {
            host: rule.host.clone(),
            mode: rule.mode,
            vault_path: if rule.mode == ExternalMode::Vault {
                non_empty(&rule.vault_path)
            } else {
                None
            },
            audience: if exchange {
                non_empty(&rule.audience)
            } else {
                None
            },
            scopes: if exchange {
                rule.scopes.clone()
            } else {
                Vec::new()
            },
            header: if injects { non_empty(&rule.header) } else { None },
            header_prefix: if injects {
                non_empty(&rule.header_prefix)
            } else {
                None
            },
        }
    }
}

impl SidecarConfig {
    /// Build the document for an agent in `card_namespace`
    pub fn new(card_namespace: &str, allowed_agents: &[String], external: &ExternalRules) -> Self {
        Self {
            gateway: SidecarGateway {
                host: format!("agent-gateway.{card_namespace}.svc.cluster.local"),
                mode: ExternalMode::Passthrough,
            },
            allowed_agents: allowed_agents.to_vec(),
            external: SidecarExternal {
                rules: external.rules.iter().map(SidecarRule::from).collect(),
                default_mode: external.default_mode,
            },
        }
    }

    /// Serialize to the YAML text stored in the ConfigMap
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(host: &str, mode: ExternalMode) -> ExternalRule {
        ExternalRule {
            host: host.to_string(),
            mode,
            vault_path: Some("secret/data/github".to_string()),
            audience: Some("openai".to_string()),
            scopes: vec!["chat".to_string()],
            header: Some("Authorization".to_string()),
            header_prefix: Some("Bearer ".to_string()),
        }
    }

    #[test]
    fn vault_rule_keeps_vault_path_and_header() {
        let r = SidecarRule::from(&rule("api.github.com", ExternalMode::Vault));
        assert_eq!(r.vault_path.as_deref(), Some("secret/data/github"));
        assert_eq!(r.header.as_deref(), Some("Authorization"));
        assert!(r.audience.is_none());
        assert!(r.scopes.is_empty());
    }

    #[test]
    fn exchange_rule_keeps_audience_and_scopes() {
        let r = SidecarRule::from(&rule("api.openai.com", ExternalMode::Exchange));
        assert_eq!(r.audience.as_deref(), Some("openai"));
        assert_eq!(r.scopes, vec!["chat"]);
        assert!(r.vault_path.is_none());
        assert_eq!(r.header_prefix.as_deref(), Some("Bearer "));
    }

    #[test]
    fn passthrough_and_deny_rules_carry_no_parameters() {
        for mode in [ExternalMode::Passthrough, ExternalMode::Deny] {
            let r = SidecarRule::from(&rule("example.com", mode));
            assert_eq!(r.mode, mode);
            assert!(r.vault_path.is_none());
            assert!(r.audience.is_none());
            assert!(r.scopes.is_empty());
            assert!(r.header.is_none());
            assert!(r.header_prefix.is_none());
        }
    }

    #[test]
    fn document_yaml_uses_sidecar_keys() {
        let external = ExternalRules {
            default_mode: ExternalMode::Deny,
            rules: vec![
                rule("api.github.com", ExternalMode::Vault),
                rule("example.com", ExternalMode::Passthrough),
            ],
        };
        let config = SidecarConfig::new("agents", &["planner".to_string()], &external);
        let yaml = config.to_yaml().unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(
            doc["gateway"]["host"].as_str(),
            Some("agent-gateway.agents.svc.cluster.local")
        );
        assert_eq!(doc["gateway"]["mode"].as_str(), Some("passthrough"));
        assert_eq!(doc["allowedAgents"][0].as_str(), Some("planner"));
        assert_eq!(doc["external"]["defaultMode"].as_str(), Some("deny"));
        assert_eq!(doc["external"]["rules"][0]["vaultPath"].as_str(), Some("secret/data/github"));
        assert_eq!(doc["external"]["rules"][1]["host"].as_str(), Some("example.com"));
        assert!(doc["external"]["rules"][1].get("header").is_none());
    }
}
