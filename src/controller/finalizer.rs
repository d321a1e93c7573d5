//! Finalizer handling shared by both controllers
//!
//! A record gets its finalizer on first sight. On deletion the finalizer is
//! removed and reconciliation stops; generated records are left to
//! owner-reference garbage collection.

use kube::{Resource, ResourceExt};
use tracing::info;

use crate::kube_client::{KubeClient, PrimaryKind};
use crate::Result;

/// What the reconciler should do after finalizer handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizerState {
    /// The record is live and carries the finalizer.
    ///
    /// Holds the resourceVersion to guard the status write with, which
    /// differs from the fetched one when the finalizer was just added.
    Active {
        /// Current resourceVersion of the record
        resource_version: Option<String>,
    },
    /// The record is being deleted; the finalizer has been released
    Released,
}

/// Check if a record carries `finalizer`
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Attach `finalizer` to a live record or release it from a deleted one
pub async fn ensure_finalizer<K: Resource>(
    kube: &dyn KubeClient,
    kind: PrimaryKind,
    obj: &K,
    finalizer: &str,
) -> Result<FinalizerState> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let resource_version = obj.resource_version();

    if obj.meta().deletion_timestamp.is_some() {
        if has_finalizer(obj, finalizer) {
            let remaining: Vec<String> = obj
                .finalizers()
                .iter()
                .filter(|f| *f != finalizer)
                .cloned()
                .collect();
            kube.patch_finalizers(kind, &namespace, &name, resource_version, remaining)
                .await?;
            info!(finalizer, "removed finalizer from deleted record");
        }
        return Ok(FinalizerState::Released);
    }

    if has_finalizer(obj, finalizer) {
        return Ok(FinalizerState::Active { resource_version });
    }

    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    let resource_version = kube
        .patch_finalizers(kind, &namespace, &name, resource_version, finalizers)
        .await?;
    info!(finalizer, "added finalizer");
    Ok(FinalizerState::Active { resource_version })
}
