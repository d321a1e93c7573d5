//! Gateway API types
//!
//! Only the HTTPRoute fields the controller sets are modelled; the API
//! server's defaulted fields (backend weight, group) are left to the diff
//! layer's subset comparison.

use serde::{Deserialize, Serialize};

use super::{impl_api_defaults, HasApiResource, ObjectMeta};

/// API group of the Gateway API
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Kubernetes Gateway API HTTPRoute resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// API version (gateway.networking.k8s.io/v1)
    #[serde(default = "HttpRoute::default_api_version")]
    pub api_version: String,
    /// Resource kind (HTTPRoute)
    #[serde(default = "HttpRoute::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// HTTPRoute specification
    pub spec: HttpRouteSpec,
}

impl HasApiResource for HttpRoute {
    const API_VERSION: &'static str = "gateway.networking.k8s.io/v1";
    const KIND: &'static str = "HTTPRoute";
}

impl_api_defaults!(HttpRoute);

impl HttpRoute {
    /// Create a new HTTPRoute
    pub fn new(metadata: ObjectMeta, spec: HttpRouteSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// HTTPRoute spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Gateways this route attaches to
    pub parent_refs: Vec<ParentRef>,
    /// Routing rules
    pub rules: Vec<HttpRouteRule>,
}

/// Parent reference for route resources
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    /// API group (gateway.networking.k8s.io)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Resource kind (Gateway)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Gateway name
    pub name: String,
    /// Gateway namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ParentRef {
    /// Reference a Gateway by name and namespace
    pub fn gateway(name: &str, namespace: &str) -> Self {
        Self {
            group: Some(GATEWAY_API_GROUP.to_string()),
            kind: Some("Gateway".to_string()),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }
}

/// HTTPRoute rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    /// Request matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpRouteMatch>,
    /// Backend references
    pub backend_refs: Vec<BackendRef>,
}

/// HTTP route match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    /// Path match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathMatch>,
}

/// HTTP path match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathMatch {
    /// Match type (PathPrefix, Exact)
    #[serde(rename = "type")]
    pub type_: String,
    /// Path value
    pub value: String,
}

impl HttpPathMatch {
    /// Prefix match on `value`
    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            type_: "PathPrefix".to_string(),
            value: value.into(),
        }
    }
}

/// Backend reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    /// Service name
    pub name: String,
    /// Service port
    pub port: i32,
}

/// Reference from a policy or registration to the HTTPRoute it attaches to
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTargetRef {
    /// API group (gateway.networking.k8s.io)
    pub group: String,
    /// Resource kind (HTTPRoute)
    pub kind: String,
    /// HTTPRoute name
    pub name: String,
}

impl RouteTargetRef {
    /// Target the named HTTPRoute in the same namespace
    pub fn http_route(name: impl Into<String>) -> Self {
        Self {
            group: GATEWAY_API_GROUP.to_string(),
            kind: HttpRoute::KIND.to_string(),
            name: name.into(),
        }
    }
}
