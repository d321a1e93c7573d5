//! Typed downstream resources
//!
//! Every record the controller writes is built as a typed value first and
//! only converted to a `DynamicObject` at the apply boundary. Gateway API,
//! Kuadrant and MCP gateway types live in their own modules; ConfigMap and
//! NetworkPolicy come from `k8s-openapi`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

use crate::registry::DownstreamKind;
use crate::{Error, Result, LABEL_AGENT_CARD, LABEL_MANAGED_BY, MANAGED_BY_VALUE};

pub mod gateway;
pub mod kuadrant;
pub mod mcp;
pub mod sidecar;

pub use gateway::{
    BackendRef, HttpPathMatch, HttpRoute, HttpRouteMatch, HttpRouteRule, HttpRouteSpec, ParentRef,
    RouteTargetRef,
};
pub use kuadrant::{
    AuthPolicy, AuthPolicySpec, AuthRules, AuthenticationRule, AuthorizationRule,
    JwtAuthentication, Limit, PatternExpression, PatternMatching, Rate, RateLimitPolicy,
    RateLimitPolicySpec,
};
pub use mcp::{McpServerRegistration, McpServerRegistrationSpec};
pub use sidecar::{SidecarConfig, SIDECAR_CONFIG_KEY};

/// Implements `default_api_version()` and `default_kind()` from `HasApiResource`
macro_rules! impl_api_defaults {
    ($type:ty) => {
        impl $type {
            fn default_api_version() -> String {
                <Self as $crate::resources::HasApiResource>::API_VERSION.to_string()
            }
            fn default_kind() -> String {
                <Self as $crate::resources::HasApiResource>::KIND.to_string()
            }
        }
    };
}
pub(crate) use impl_api_defaults;

// =============================================================================
// ObjectMeta
// =============================================================================

/// Metadata for generated resources.
///
/// Carries the two management labels and exactly one controller owner
/// reference. Built fresh for every synthesis call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Owner references (always exactly one)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Create metadata for a record generated on behalf of `card_name`
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        card_name: &str,
        owner: OwnerReference,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: common_labels(card_name),
            owner_references: vec![owner],
        }
    }

    /// Convert into the k8s-openapi form used by native kinds
    pub fn into_k8s(self) -> k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(self.name),
            namespace: Some(self.namespace),
            labels: Some(self.labels),
            owner_references: Some(self.owner_references),
            ..Default::default()
        }
    }
}

/// Labels stamped on every generated record
pub fn common_labels(card_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
        (LABEL_AGENT_CARD.to_string(), card_name.to_string()),
    ])
}

/// Label selector string matching the records generated for one card
pub fn card_label_selector(card_name: &str) -> String {
    format!("{LABEL_MANAGED_BY}={MANAGED_BY_VALUE},{LABEL_AGENT_CARD}={card_name}")
}

/// Controller owner reference to `owner`, cascading deletion to the child.
///
/// Fails when the owner has not been persisted yet (no uid).
pub fn controller_owner_ref<K>(owner: &K) -> Result<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation(format!(
            "{} {} has no uid; cannot own generated resources",
            K::kind(&()),
            owner.name_any()
        ))
    })?;
    Ok(OwnerReference {
        block_owner_deletion: Some(true),
        ..owner_ref
    })
}

// =============================================================================
// HasApiResource
// =============================================================================

/// Types with a compile-time API version and kind
pub trait HasApiResource {
    /// Full API version (e.g., "kuadrant.io/v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "AuthPolicy")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from an apiVersion string and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    match lower.strip_suffix('y') {
        Some(stem) => format!("{stem}ies"),
        None => format!("{lower}s"),
    }
}

// =============================================================================
// DownstreamResource
// =============================================================================

/// One desired downstream record, tagged by kind
#[derive(Clone, Debug, PartialEq)]
pub enum DownstreamResource {
    /// Gateway API HTTPRoute owned by an AgentCard
    HttpRoute(HttpRoute),
    /// Kuadrant AuthPolicy owned by an AgentPolicy
    AuthPolicy(AuthPolicy),
    /// Kuadrant RateLimitPolicy owned by an AgentPolicy
    RateLimitPolicy(RateLimitPolicy),
    /// Sidecar configuration owned by an AgentPolicy
    ConfigMap(ConfigMap),
    /// Egress NetworkPolicy owned by an AgentPolicy
    NetworkPolicy(NetworkPolicy),
    /// MCP gateway registration owned by an AgentCard
    McpServerRegistration(McpServerRegistration),
}

impl DownstreamResource {
    /// Kind tag used for registry lookup
    pub fn kind(&self) -> DownstreamKind {
        match self {
            Self::HttpRoute(_) => DownstreamKind::HttpRoute,
            Self::AuthPolicy(_) => DownstreamKind::AuthPolicy,
            Self::RateLimitPolicy(_) => DownstreamKind::RateLimitPolicy,
            Self::ConfigMap(_) => DownstreamKind::ConfigMap,
            Self::NetworkPolicy(_) => DownstreamKind::NetworkPolicy,
            Self::McpServerRegistration(_) => DownstreamKind::McpServerRegistration,
        }
    }

    /// Name of the record
    pub fn name(&self) -> String {
        match self {
            Self::HttpRoute(r) => r.metadata.name.clone(),
            Self::AuthPolicy(r) => r.metadata.name.clone(),
            Self::RateLimitPolicy(r) => r.metadata.name.clone(),
            Self::ConfigMap(r) => r.name_any(),
            Self::NetworkPolicy(r) => r.name_any(),
            Self::McpServerRegistration(r) => r.metadata.name.clone(),
        }
    }

    /// Namespace of the record
    pub fn namespace(&self) -> String {
        match self {
            Self::HttpRoute(r) => r.metadata.namespace.clone(),
            Self::AuthPolicy(r) => r.metadata.namespace.clone(),
            Self::RateLimitPolicy(r) => r.metadata.namespace.clone(),
            Self::ConfigMap(r) => r.namespace().unwrap_or_default(),
            Self::NetworkPolicy(r) => r.namespace().unwrap_or_default(),
            Self::McpServerRegistration(r) => r.metadata.namespace.clone(),
        }
    }

    /// Serialize into a `DynamicObject`, stamping apiVersion from the
    /// discovered ApiResource so the served version is what gets written.
    pub fn to_dynamic(&self, ar: &ApiResource) -> Result<DynamicObject> {
        let mut value = match self {
            Self::HttpRoute(r) => serde_json::to_value(r)?,
            Self::AuthPolicy(r) => serde_json::to_value(r)?,
            Self::RateLimitPolicy(r) => serde_json::to_value(r)?,
            Self::ConfigMap(r) => serde_json::to_value(r)?,
            Self::NetworkPolicy(r) => serde_json::to_value(r)?,
            Self::McpServerRegistration(r) => serde_json::to_value(r)?,
        };
        if let Some(obj) = value.as_object_mut() {
            obj.insert("apiVersion".to_string(), ar.api_version.clone().into());
            obj.insert("kind".to_string(), ar.kind.clone().into());
        }
        Ok(serde_json::from_value(value)?)
    }
}
