//! Create-or-update of downstream records
//!
//! [`apply`] looks the record up, creates it when absent, and replaces it
//! only when [`diff::is_up_to_date`] says the stored copy has drifted. The
//! comparison is what keeps reconciles from re-triggering themselves through
//! the ownership watches, so an unchanged record must never be written.

pub mod degradation;
pub mod diff;

use tracing::{debug, info};

use crate::kube_client::KubeClient;
use crate::registry::KindRegistry;
use crate::resources::DownstreamResource;
use crate::Error;

pub use degradation::{classify, Degradation};
pub use diff::{is_equivalent, is_up_to_date, Projection};

/// What a successful apply did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The record did not exist and was created
    Created,
    /// The stored record had drifted and was replaced
    Updated,
    /// The stored record already matched; nothing was written
    Unchanged,
}

/// Step of [`apply`] that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    /// Looking the kind up in the registry
    Resolve,
    /// Serializing or reading the stored record
    Read,
    /// Creating the record
    Create,
    /// Replacing the record
    Update,
}

/// A failed apply and the step it failed at
#[derive(Debug)]
pub struct ApplyError {
    /// Failing step
    pub stage: ApplyStage,
    /// Underlying failure
    pub source: Error,
}

impl ApplyError {
    fn at(stage: ApplyStage) -> impl FnOnce(Error) -> Self {
        move |source| Self { stage, source }
    }
}

impl From<ApplyError> for Error {
    fn from(e: ApplyError) -> Self {
        e.source
    }
}

/// Create or update `desired`, writing only when the stored copy differs.
///
/// Fails at [`ApplyStage::Resolve`] with [`Error::SchemaUnavailable`] when
/// the registry does not know the kind; callers decide via [`classify`]
/// whether that is fatal.
pub async fn apply(
    kube: &dyn KubeClient,
    registry: &KindRegistry,
    desired: &DownstreamResource,
) -> std::result::Result<ApplyOutcome, ApplyError> {
    let kind = desired.kind();
    let ar = registry
        .resolve(kind)
        .await
        .ok_or_else(|| Error::schema_unavailable(kind.kind_str()))
        .map_err(ApplyError::at(ApplyStage::Resolve))?;

    let name = desired.name();
    let namespace = desired.namespace();
    let mut object = desired
        .to_dynamic(&ar)
        .map_err(ApplyError::at(ApplyStage::Read))?;

    let stored = kube
        .get_resource(&ar, &namespace, &name)
        .await
        .map_err(ApplyError::at(ApplyStage::Read))?;

    match stored {
        None => {
            kube.create_resource(&ar, &namespace, &object)
                .await
                .map_err(ApplyError::at(ApplyStage::Create))?;
            info!(kind = %kind, namespace = %namespace, name = %name, "created downstream resource");
            Ok(ApplyOutcome::Created)
        }
        Some(stored) if is_up_to_date(kind, &object, &stored) => {
            debug!(kind = %kind, namespace = %namespace, name = %name, "downstream resource up to date");
            Ok(ApplyOutcome::Unchanged)
        }
        Some(stored) => {
            object.metadata.resource_version = stored.metadata.resource_version.clone();
            carry_foreign_metadata(&mut object, &stored);
            kube.replace_resource(&ar, &namespace, &name, &object)
                .await
                .map_err(ApplyError::at(ApplyStage::Update))?;
            info!(kind = %kind, namespace = %namespace, name = %name, "updated downstream resource");
            Ok(ApplyOutcome::Updated)
        }
    }
}

/// Keep labels, annotations and finalizers others added so a replace does not strip them
fn carry_foreign_metadata(object: &mut kube::api::DynamicObject, stored: &kube::api::DynamicObject) {
    if let Some(stored_labels) = &stored.metadata.labels {
        let labels = object.metadata.labels.get_or_insert_with(Default::default);
        for (key, value) in stored_labels {
            labels.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    if object.metadata.annotations.is_none() {
        object.metadata.annotations = stored.metadata.annotations.clone();
    }
    if object.metadata.finalizers.is_none() {
        object.metadata.finalizers = stored.metadata.finalizers.clone();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::DynamicObject;

    use super::*;
    use crate::error::api_error;
    use crate::kube_client::MockKubeClient;
    use crate::registry::DownstreamKind;
    use crate::resources::{
        BackendRef, HttpPathMatch, HttpRoute, HttpRouteMatch, HttpRouteRule, HttpRouteSpec,
        ObjectMeta, ParentRef, RateLimitPolicy, RateLimitPolicySpec, RouteTargetRef,
    };

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "kagenti.com/v1alpha1".to_string(),
            kind: "AgentCard".to_string(),
            name: "weather".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn route(port: i32) -> DownstreamResource {
        DownstreamResource::HttpRoute(HttpRoute::new(
            ObjectMeta::new("agent-weather", "agents", "weather", owner()),
            HttpRouteSpec {
                parent_refs: vec![ParentRef::gateway("gw", "gateway-system")],
                rules: vec![HttpRouteRule {
                    matches: vec![HttpRouteMatch {
                        path: Some(HttpPathMatch::prefix("/agents/weather")),
                    }],
                    backend_refs: vec![BackendRef {
                        name: "weather-svc".to_string(),
                        port,
                    }],
                }],
            },
        ))
    }

    fn rlp() -> DownstreamResource {
        DownstreamResource::RateLimitPolicy(RateLimitPolicy::new(
            ObjectMeta::new("rlp-weather", "agents", "weather", owner()),
            RateLimitPolicySpec {
                target_ref: RouteTargetRef::http_route("agent-weather"),
                limits: Default::default(),
            },
        ))
    }

    /// Mock backed by a single stored slot, counting writes
    fn stateful_mock(writes: Arc<Mutex<Vec<&'static str>>>) -> MockKubeClient {
        let stored: Arc<Mutex<Option<DynamicObject>>> = Arc::new(Mutex::new(None));
        let mut mock = MockKubeClient::new();

        let read = stored.clone();
        mock.expect_get_resource()
            .returning(move |_, _, _| Ok(read.lock().unwrap().clone()));

        let create_slot = stored.clone();
        let create_writes = writes.clone();
        mock.expect_create_resource().returning(move |_, _, obj| {
            let mut obj = obj.clone();
            obj.metadata.resource_version = Some("1".to_string());
            *create_slot.lock().unwrap() = Some(obj);
            create_writes.lock().unwrap().push("create");
            Ok(())
        });

        let replace_slot = stored;
        mock.expect_replace_resource().returning(move |_, _, _, obj| {
            *replace_slot.lock().unwrap() = Some(obj.clone());
            writes.lock().unwrap().push("replace");
            Ok(())
        });
        mock
    }

    #[tokio::test]
    async fn applying_twice_writes_once() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mock = stateful_mock(writes.clone());
        let registry = KindRegistry::with_kinds(&[DownstreamKind::HttpRoute]);

        let first = apply(&mock, &registry, &route(8080)).await.unwrap();
        let second = apply(&mock, &registry, &route(8080)).await.unwrap();

        assert_eq!(first, ApplyOutcome::Created);
        assert_eq!(second, ApplyOutcome::Unchanged);
        assert_eq!(*writes.lock().unwrap(), vec!["create"]);
    }

    #[tokio::test]
    async fn drift_is_replaced_with_stored_resource_version() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let registry = KindRegistry::with_kinds(&[DownstreamKind::HttpRoute]);
        let ar = registry.resolve(DownstreamKind::HttpRoute).await.unwrap();

        let mut stored = route(8080).to_dynamic(&ar).unwrap();
        stored.metadata.resource_version = Some("77".to_string());

        let mut mock = MockKubeClient::new();
        mock.expect_get_resource()
            .returning(move |_, _, _| Ok(Some(stored.clone())));
        let seen = writes.clone();
        mock.expect_replace_resource()
            .withf(|_, ns, name, obj| {
                ns == "agents"
                    && name == "agent-weather"
                    && obj.metadata.resource_version.as_deref() == Some("77")
            })
            .times(1)
            .returning(move |_, _, _, _| {
                seen.lock().unwrap().push("replace");
                Ok(())
            });

        let outcome = apply(&mock, &registry, &route(9090)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
        assert_eq!(*writes.lock().unwrap(), vec!["replace"]);
    }

    #[tokio::test]
    async fn out_of_band_spec_addition_is_reverted() {
        let registry = KindRegistry::with_kinds(&[DownstreamKind::HttpRoute]);
        let ar = registry.resolve(DownstreamKind::HttpRoute).await.unwrap();

        let mut stored = route(8080).to_dynamic(&ar).unwrap();
        stored.metadata.resource_version = Some("5".to_string());
        stored.data["spec"]["hostnames"] = serde_json::json!(["public.example.com"]);

        let mut mock = MockKubeClient::new();
        mock.expect_get_resource()
            .returning(move |_, _, _| Ok(Some(stored.clone())));
        mock.expect_replace_resource()
            .withf(|_, _, _, obj| obj.data["spec"].get("hostnames").is_none())
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let outcome = apply(&mock, &registry, &route(8080)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
    }

    #[tokio::test]
    async fn uninstalled_kind_is_schema_unavailable_without_api_calls() {
        let mock = MockKubeClient::new();
        let registry = KindRegistry::with_kinds(&[DownstreamKind::HttpRoute]);

        let err = apply(&mock, &registry, &rlp()).await.unwrap_err();
        assert_eq!(err.stage, ApplyStage::Resolve);
        assert!(matches!(err.source, Error::SchemaUnavailable { .. }));
        assert_eq!(
            classify(DownstreamKind::RateLimitPolicy, &err.source),
            Degradation::SchemaUnavailable
        );
    }

    #[tokio::test]
    async fn create_failure_propagates() {
        let mut mock = MockKubeClient::new();
        mock.expect_get_resource().returning(|_, _, _| Ok(None));
        mock.expect_create_resource()
            .returning(|_, _, _| Err(api_error(403, "Forbidden")));
        let registry = KindRegistry::with_kinds(&[DownstreamKind::HttpRoute]);

        let err = apply(&mock, &registry, &route(8080)).await.unwrap_err();
        assert_eq!(err.stage, ApplyStage::Create);
        assert_eq!(err.source.status_code(), Some(403));
    }

    #[test]
    fn replace_keeps_foreign_labels_and_annotations() {
        let ar = DownstreamKind::HttpRoute.default_api_resource();

        let mut desired = route(9090).to_dynamic(&ar).unwrap();
        let mut stored = route(8080).to_dynamic(&ar).unwrap();
        stored
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("team".to_string(), "search".to_string());
        stored.metadata.annotations = Some(
            [("note".to_string(), "keep".to_string())]
                .into_iter()
                .collect(),
        );

        carry_foreign_metadata(&mut desired, &stored);
        let labels = desired.metadata.labels.unwrap();
        assert_eq!(labels["team"], "search");
        assert_eq!(labels["kagenti.com/agent-card"], "weather");
        assert_eq!(desired.metadata.annotations.unwrap()["note"], "keep");
    }

    #[test]
    fn replace_keeps_finalizers_of_other_controllers() {
        let ar = DownstreamKind::HttpRoute.default_api_resource();

        let mut desired = route(9090).to_dynamic(&ar).unwrap();
        let mut stored = route(8080).to_dynamic(&ar).unwrap();
        stored.metadata.finalizers = Some(vec!["kuadrant.io/route".to_string()]);

        carry_foreign_metadata(&mut desired, &stored);
        assert_eq!(
            desired.metadata.finalizers,
            Some(vec!["kuadrant.io/route".to_string()])
        );
    }
}
