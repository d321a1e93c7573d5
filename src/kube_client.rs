//! Kubernetes API boundary
//!
//! Every read and write the controllers perform goes through [`KubeClient`],
//! so reconcile logic can be driven by `MockKubeClient` in tests. There is
//! no delete operation: generated records are removed by owner-reference
//! garbage collection.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::json;

use crate::crd::{AgentCard, AgentCardStatus, AgentPolicy, AgentPolicyStatus};
use crate::{Error, FIELD_MANAGER};

/// The two record kinds the controller watches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryKind {
    /// AgentCard
    AgentCard,
    /// AgentPolicy
    AgentPolicy,
}

/// Trait abstracting Kubernetes operations for the controllers
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch an AgentCard; `None` if it does not exist
    async fn get_agent_card(&self, namespace: &str, name: &str)
        -> Result<Option<AgentCard>, Error>;

    /// List all AgentCards in a namespace
    async fn list_agent_cards(&self, namespace: &str) -> Result<Vec<AgentCard>, Error>;

    /// Fetch an AgentPolicy; `None` if it does not exist
    async fn get_agent_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AgentPolicy>, Error>;

    /// Merge-patch an AgentCard's status.
    ///
    /// With `resource_version` set the write is rejected with 409 if the
    /// card changed since it was read.
    async fn patch_card_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &AgentCardStatus,
    ) -> Result<(), Error>;

    /// Merge-patch an AgentPolicy's status, guarded like [`Self::patch_card_status`]
    async fn patch_policy_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &AgentPolicyStatus,
    ) -> Result<(), Error>;

    /// Replace a record's finalizer list, returning the new resourceVersion
    async fn patch_finalizers(
        &self,
        kind: PrimaryKind,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<Option<String>, Error>;

    /// Fetch a downstream record; `None` if it does not exist
    async fn get_resource(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// List downstream records matching a label selector
    async fn list_resources(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Create a downstream record
    async fn create_resource(
        &self,
        ar: &ApiResource,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<(), Error>;

    /// Replace a downstream record; `obj` must carry the stored resourceVersion
    async fn replace_resource(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        obj: &DynamicObject,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn status_patch<S: serde::Serialize>(
    resource_version: Option<String>,
    status: &S,
) -> serde_json::Value {
    match resource_version {
        Some(rv) => json!({ "metadata": { "resourceVersion": rv }, "status": status }),
        None => json!({ "status": status }),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_agent_card(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AgentCard>, Error> {
        let api: Api<AgentCard> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_agent_cards(&self, namespace: &str) -> Result<Vec<AgentCard>, Error> {
        let api: Api<AgentCard> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_agent_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AgentPolicy>, Error> {
        let api: Api<AgentPolicy> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_card_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &AgentCardStatus,
    ) -> Result<(), Error> {
        let api: Api<AgentCard> = Api::namespaced(self.client.clone(), namespace);
        let patch = status_patch(resource_version, status);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_policy_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &AgentPolicyStatus,
    ) -> Result<(), Error> {
        let api: Api<AgentPolicy> = Api::namespaced(self.client.clone(), namespace);
        let patch = status_patch(resource_version, status);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_finalizers(
        &self,
        kind: PrimaryKind,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<Option<String>, Error> {
        let patch = match resource_version {
            Some(rv) => json!({ "metadata": { "resourceVersion": rv, "finalizers": finalizers } }),
            None => json!({ "metadata": { "finalizers": finalizers } }),
        };
        let params = PatchParams::default();
        let patched = match kind {
            PrimaryKind::AgentCard => {
                let api: Api<AgentCard> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch))
                    .await?
                    .metadata
                    .resource_version
            }
            PrimaryKind::AgentPolicy => {
                let api: Api<AgentPolicy> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch))
                    .await?
                    .metadata
                    .resource_version
            }
        };
        Ok(patched)
    }

    async fn get_resource(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, ar);
        Ok(api.get_opt(name).await?)
    }

    async fn list_resources(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, ar);
        let params = ListParams::default().labels(label_selector);
        Ok(api.list(&params).await?.items)
    }

    async fn create_resource(
        &self,
        ar: &ApiResource,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<(), Error> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, ar);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.create(&params, obj).await?;
        Ok(())
    }

    async fn replace_resource(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        obj: &DynamicObject,
    ) -> Result<(), Error> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, ar);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.replace(name, &params, obj).await?;
        Ok(())
    }
}
