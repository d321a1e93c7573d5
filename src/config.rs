//! Controller configuration
//!
//! [`ControllerConfig`] carries the inputs the resource compiler needs that
//! do not come from the watched records. [`PodEnv`] abstracts the downward
//! API environment so leader election identity can be tested without
//! touching process globals.

use crate::{Error, Result, DEFAULT_ISSUER_URL};

/// Inputs to resource synthesis that come from the deployment, not from records
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Gateway every generated HTTPRoute attaches to
    pub gateway_name: String,
    /// Namespace of that gateway
    pub gateway_namespace: String,
    /// OIDC issuer generated AuthPolicies verify JWTs against
    pub issuer_url: String,
}

impl ControllerConfig {
    /// Create a config with the default issuer
    pub fn new(gateway_name: impl Into<String>, gateway_namespace: impl Into<String>) -> Self {
        Self {
            gateway_name: gateway_name.into(),
            gateway_namespace: gateway_namespace.into(),
            issuer_url: DEFAULT_ISSUER_URL.to_string(),
        }
    }

    /// Override the JWT issuer
    pub fn with_issuer_url(mut self, issuer_url: impl Into<String>) -> Self {
        self.issuer_url = issuer_url.into();
        self
    }

    /// Reject configurations that would produce unusable records
    pub fn validate(&self) -> Result<()> {
        if self.gateway_name.trim().is_empty() {
            return Err(Error::validation("gateway name must not be empty"));
        }
        if self.gateway_namespace.trim().is_empty() {
            return Err(Error::validation("gateway namespace must not be empty"));
        }
        if !(self.issuer_url.starts_with("https://") || self.issuer_url.starts_with("http://")) {
            return Err(Error::validation(format!(
                "issuer URL '{}' must start with https:// or http://",
                self.issuer_url
            )));
        }
        Ok(())
    }
}

/// Trait for reading the pod's downward-API environment
#[cfg_attr(test, mockall::automock)]
pub trait PodEnv: Send + Sync {
    /// Namespace the controller runs in
    fn pod_namespace(&self) -> Option<String>;

    /// Name of the controller's pod
    fn pod_name(&self) -> Option<String>;

    /// Hostname fallback for the pod name
    fn hostname(&self) -> Option<String>;
}

/// Leader election identity: pod name, then hostname, then a fixed fallback
pub fn holder_identity(env: &dyn PodEnv) -> String {
    env.pod_name()
        .or_else(|| env.hostname())
        .unwrap_or_else(|| "agent-access-control".to_string())
}

/// Namespace for the leader lease when none is configured
pub fn lease_namespace(env: &dyn PodEnv) -> String {
    env.pod_namespace().unwrap_or_else(|| "default".to_string())
}

/// Default implementation that reads from environment variables
#[derive(Clone, Default)]
pub struct OsPodEnv;

impl PodEnv for OsPodEnv {
    fn pod_namespace(&self) -> Option<String> {
        std::env::var("POD_NAMESPACE").ok()
    }

    fn pod_name(&self) -> Option<String> {
        std::env::var("POD_NAME").ok()
    }

    fn hostname(&self) -> Option<String> {
        std::env::var("HOSTNAME").ok()
    }
}
