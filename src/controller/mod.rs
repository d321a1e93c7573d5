//! Reconcilers for AgentCard and AgentPolicy
//!
//! Both reconcilers share a [`Context`] holding the API boundary, the kind
//! registry and the deployment configuration. Each invocation refetches the
//! record, handles its finalizer, recomputes every downstream record from
//! scratch and writes status once at the end.

pub mod agent_card;
pub mod agent_policy;
pub mod fanout;
pub mod finalizer;

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, warn};

use crate::apply::{apply, classify, ApplyOutcome, Degradation};
use crate::config::ControllerConfig;
use crate::kube_client::{KubeClient, KubeClientImpl};
use crate::registry::KindRegistry;
use crate::resources::DownstreamResource;
use crate::{Error, Result};

pub use fanout::FanOut;
pub use finalizer::{ensure_finalizer, has_finalizer, FinalizerState};

/// Delay before a failed reconcile is retried
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Shared state for both reconcilers
pub struct Context {
    /// Kubernetes API boundary
    pub kube: Arc<dyn KubeClient>,
    /// Downstream kinds served by this cluster
    pub registry: Arc<KindRegistry>,
    /// Deployment configuration
    pub config: ControllerConfig,
}

impl Context {
    /// Create a context backed by a real client
    pub fn new(client: Client, registry: Arc<KindRegistry>, config: ControllerConfig) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
            registry,
            config,
        }
    }

    /// Create a context for testing with a mock client
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        registry: Arc<KindRegistry>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            kube,
            registry,
            config,
        }
    }

    /// Apply a record, folding schema-unavailable failures into `Ok(None)`
    pub async fn apply_tolerant(
        &self,
        desired: &DownstreamResource,
    ) -> Result<Option<ApplyOutcome>> {
        match apply(self.kube.as_ref(), &self.registry, desired).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => match classify(desired.kind(), &e.source) {
                Degradation::SchemaUnavailable => {
                    crate::metrics::record_schema_unavailable_skip(desired.kind());
                    info!(
                        kind = %desired.kind(),
                        name = %desired.name(),
                        "downstream kind not installed, skipping"
                    );
                    Ok(None)
                }
                Degradation::Real => Err(Error::apply(
                    desired.kind().kind_str(),
                    desired.name(),
                    e.source,
                )),
            },
        }
    }
}

/// Namespace of a primary record, required for every reconcile
pub(crate) fn require_namespace<K: Resource>(obj: &K) -> Result<String> {
    obj.namespace()
        .ok_or_else(|| Error::validation(format!("{} has no namespace", obj.name_any())))
}

/// Status writes are best-effort against concurrent updates: a conflict
/// means a newer reconcile owns the status, so it is dropped.
pub(crate) fn tolerate_status_conflict(result: Result<()>, record: &str) -> Result<()> {
    match result {
        Err(e) if e.is_conflict() => {
            warn!(record, "status update conflicted with a newer write, dropping");
            Ok(())
        }
        other => other,
    }
}

/// Error policy shared by both controllers
pub fn error_policy<K>(obj: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action
where
    K: Resource,
{
    error!(
        ?error,
        record = %obj.name_any(),
        namespace = %obj.namespace().unwrap_or_default(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}
