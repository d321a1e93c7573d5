//! Downstream kind registry
//!
//! The controller writes six kinds of records. Two are native (ConfigMap,
//! NetworkPolicy) and always served; HTTPRoute comes from the Gateway API
//! CRDs the controller requires; AuthPolicy, RateLimitPolicy and
//! MCPServerRegistration come from optional add-ons. The registry is built
//! once at startup from API discovery and shared through the reconcile
//! context, so every component resolves kinds against the same view.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use tracing::{info, warn};

use crate::resources::build_api_resource;

/// Minimum spacing between lazy re-discovery runs
const REDISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Kinds of records the controller generates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownstreamKind {
    /// HTTPRoute (gateway.networking.k8s.io)
    HttpRoute,
    /// AuthPolicy (kuadrant.io)
    AuthPolicy,
    /// RateLimitPolicy (kuadrant.io)
    RateLimitPolicy,
    /// ConfigMap (core)
    ConfigMap,
    /// NetworkPolicy (networking.k8s.io)
    NetworkPolicy,
    /// MCPServerRegistration (mcp.kagenti.com)
    McpServerRegistration,
}

/// All DownstreamKind variants for iteration.
pub const ALL_DOWNSTREAM_KINDS: &[DownstreamKind] = &[
    DownstreamKind::HttpRoute,
    DownstreamKind::AuthPolicy,
    DownstreamKind::RateLimitPolicy,
    DownstreamKind::ConfigMap,
    DownstreamKind::NetworkPolicy,
    DownstreamKind::McpServerRegistration,
];

impl DownstreamKind {
    /// API group for discovery lookup ("" for core)
    pub fn group(&self) -> &'static str {
        match self {
            Self::HttpRoute => "gateway.networking.k8s.io",
            Self::AuthPolicy | Self::RateLimitPolicy => "kuadrant.io",
            Self::ConfigMap => "",
            Self::NetworkPolicy => "networking.k8s.io",
            Self::McpServerRegistration => "mcp.kagenti.com",
        }
    }

    /// Kubernetes Kind string
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::HttpRoute => "HTTPRoute",
            Self::AuthPolicy => "AuthPolicy",
            Self::RateLimitPolicy => "RateLimitPolicy",
            Self::ConfigMap => "ConfigMap",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::McpServerRegistration => "MCPServerRegistration",
        }
    }

    /// API version used when discovery is unavailable
    pub fn default_api_version(&self) -> &'static str {
        match self {
            Self::HttpRoute => "gateway.networking.k8s.io/v1",
            Self::AuthPolicy | Self::RateLimitPolicy => "kuadrant.io/v1",
            Self::ConfigMap => "v1",
            Self::NetworkPolicy => "networking.k8s.io/v1",
            Self::McpServerRegistration => "mcp.kagenti.com/v1alpha1",
        }
    }

    /// Built into every Kubernetes API server
    pub fn is_native(&self) -> bool {
        matches!(self, Self::ConfigMap | Self::NetworkPolicy)
    }

    /// Provided by an add-on whose absence is tolerated
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            Self::AuthPolicy | Self::RateLimitPolicy | Self::McpServerRegistration
        )
    }

    /// ApiResource built from the default version
    pub fn default_api_resource(&self) -> ApiResource {
        build_api_resource(self.default_api_version(), self.kind_str())
    }
}

impl std::fmt::Display for DownstreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_str())
    }
}

/// Cache of which downstream kinds this cluster serves, and at which version.
///
/// Uses `DashMap` so parallel reconciles read without contending. A miss on
/// a kind triggers at most one re-discovery per [`REDISCOVERY_INTERVAL`], so
/// an add-on installed after startup is picked up without a restart.
pub struct KindRegistry {
    client: Option<Client>,
    entries: DashMap<DownstreamKind, ApiResource>,
    last_rediscovery: Mutex<Option<Instant>>,
}

impl KindRegistry {
    /// Run API discovery once and record every served downstream kind.
    pub async fn discover(client: Client) -> Self {
        let registry = Self::native_only(Some(client.clone()));

        match Discovery::new(client).run().await {
            Ok(discovery) => {
                registry.populate(&discovery);
                info!(
                    discovered = registry.entries.len(),
                    total = ALL_DOWNSTREAM_KINDS.len(),
                    "kind registry populated via API discovery"
                );
            }
            Err(e) => {
                warn!(error = %e, "API discovery failed, assuming default versions for all kinds");
                for kind in ALL_DOWNSTREAM_KINDS {
                    registry.entries.insert(*kind, kind.default_api_resource());
                }
            }
        }

        registry
    }

    /// Registry serving exactly `kinds` (plus the native kinds) at their
    /// default versions, without re-discovery.
    pub fn with_kinds(kinds: &[DownstreamKind]) -> Self {
        let registry = Self::native_only(None);
        for kind in kinds {
            registry.entries.insert(*kind, kind.default_api_resource());
        }
        registry
    }

    fn native_only(client: Option<Client>) -> Self {
        let entries = DashMap::new();
        for kind in ALL_DOWNSTREAM_KINDS.iter().filter(|k| k.is_native()) {
            entries.insert(*kind, kind.default_api_resource());
        }
        Self {
            client,
            entries,
            last_rediscovery: Mutex::new(None),
        }
    }

    fn populate(&self, discovery: &Discovery) -> u32 {
        let mut newly_found = 0;
        for kind in ALL_DOWNSTREAM_KINDS {
            if kind.is_native() || self.entries.contains_key(kind) {
                continue;
            }
            if let Some(ar) = find_discovered_resource(discovery, kind.group(), kind.kind_str()) {
                self.entries.insert(*kind, ar);
                newly_found += 1;
            }
        }
        newly_found
    }

    /// ApiResource recorded for `kind`, without re-discovery
    pub fn lookup(&self, kind: DownstreamKind) -> Option<ApiResource> {
        self.entries.get(&kind).map(|r| r.clone())
    }

    /// Resolve a kind, re-running discovery on a miss.
    ///
    /// `None` means the kind's CRD is not installed in this cluster.
    pub async fn resolve(&self, kind: DownstreamKind) -> Option<ApiResource> {
        if let Some(ar) = self.entries.get(&kind) {
            return Some(ar.clone());
        }

        if self.rediscovery_due() {
            info!(
                kind = kind.kind_str(),
                group = kind.group(),
                "kind missing from registry, attempting lazy discovery"
            );
            self.rediscover().await;
        }
        self.entries.get(&kind).map(|r| r.clone())
    }

    fn rediscovery_due(&self) -> bool {
        if self.client.is_none() {
            return false;
        }
        let mut last = self
            .last_rediscovery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last {
            Some(at) if at.elapsed() < REDISCOVERY_INTERVAL => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    async fn rediscover(&self) {
        let Some(client) = self.client.clone() else {
            return;
        };
        let discovery = match Discovery::new(client).run().await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "kind re-discovery failed");
                return;
            }
        };

        let newly_found = self.populate(&discovery);
        if newly_found > 0 {
            info!(newly_found, "kind re-discovery found new CRDs");
        }
    }
}

/// Look up a resource in discovery results, preferring the most stable version.
fn find_discovered_resource(discovery: &Discovery, group: &str, kind: &str) -> Option<ApiResource> {
    for api_group in discovery.groups() {
        if api_group.name() != group {
            continue;
        }
        for (ar, _caps) in api_group.resources_by_stability() {
            if ar.kind == kind {
                info!(group = %group, kind = %kind, api_version = %ar.api_version, "discovered CRD version");
                return Some(ar);
            }
        }
    }
    warn!(group = %group, kind = %kind, "CRD not found in API discovery");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_group_and_version_are_consistent() {
        for kind in ALL_DOWNSTREAM_KINDS {
            assert!(!kind.kind_str().is_empty(), "{:?} has empty kind", kind);
            assert!(
                kind.default_api_version().starts_with(kind.group()),
                "{:?}: api_version '{}' doesn't start with group '{}'",
                kind,
                kind.default_api_version(),
                kind.group()
            );
        }
    }

    #[test]
    fn native_optional_and_required_partition() {
        assert!(DownstreamKind::ConfigMap.is_native());
        assert!(DownstreamKind::NetworkPolicy.is_native());
        assert!(!DownstreamKind::HttpRoute.is_native());
        assert!(!DownstreamKind::HttpRoute.is_optional());
        for kind in [
            DownstreamKind::AuthPolicy,
            DownstreamKind::RateLimitPolicy,
            DownstreamKind::McpServerRegistration,
        ] {
            assert!(kind.is_optional());
            assert!(!kind.is_native());
        }
    }

    #[tokio::test]
    async fn native_kinds_always_resolve() {
        let registry = KindRegistry::with_kinds(&[]);
        let cm = registry.resolve(DownstreamKind::ConfigMap).await.unwrap();
        assert_eq!(cm.api_version, "v1");
        assert_eq!(cm.plural, "configmaps");
        assert!(registry
            .resolve(DownstreamKind::NetworkPolicy)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn uninstalled_kind_resolves_to_none() {
        let registry = KindRegistry::with_kinds(&[DownstreamKind::HttpRoute]);
        assert!(registry.resolve(DownstreamKind::HttpRoute).await.is_some());
        assert!(registry.resolve(DownstreamKind::AuthPolicy).await.is_none());
        assert!(registry.lookup(DownstreamKind::McpServerRegistration).is_none());
    }

    #[test]
    fn rediscovery_is_skipped_without_client() {
        let registry = KindRegistry::with_kinds(&[]);
        assert!(!registry.rediscovery_due());
    }
}
