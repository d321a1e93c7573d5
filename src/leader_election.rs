//! Leader election using Kubernetes Leases
//!
//! With `--leader-elect` only the replica holding the
//! `coordination.k8s.io/v1` Lease runs controllers. Every write to the Lease
//! carries the resourceVersion that was read, so two replicas racing for an
//! expired lease cannot both win: the loser gets 409 Conflict and waits.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Error, Result, FIELD_MANAGER};

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// What to do with the lease as currently stored
#[derive(Debug, Clone, PartialEq, Eq)]
enum LeaseAction {
    /// No lease exists yet
    Create,
    /// We hold it; bump the renew time
    Renew,
    /// Someone else held it but let it expire
    TakeOver { transitions: i32 },
    /// Someone else holds a live lease
    Wait,
}

fn decide(existing: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseAction {
    let Some(lease) = existing else {
        return LeaseAction::Create;
    };
    let spec = lease.spec.as_ref();
    if spec.and_then(|s| s.holder_identity.as_deref()) == Some(identity) {
        return LeaseAction::Renew;
    }

    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (renew_time, duration_secs) {
        (Some(rt), Some(duration)) => now > rt.0 + chrono::Duration::seconds(i64::from(duration)),
        _ => true,
    };
    if expired {
        LeaseAction::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0),
        }
    } else {
        LeaseAction::Wait
    }
}

/// Leader elector backed by a named Lease
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    /// Create an elector for `lease_name` in `namespace`, competing as `identity`
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Block until leadership is acquired, then return a guard that keeps renewing it
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(identity = %self.identity, lease = %self.lease_name, "waiting for leadership");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "leadership acquired");
                    return self.create_guard();
                }
                Ok(false) => debug!(identity = %self.identity, "lease held by another replica"),
                Err(e) => warn!(identity = %self.identity, error = %e, "failed to acquire lease, retrying"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });
        LeaderGuard {
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();
        let existing = api.get_opt(&self.lease_name).await?;

        let lease = match decide(existing.as_ref(), &self.identity, now) {
            LeaseAction::Wait => return Ok(false),
            LeaseAction::Create => {
                let lease = self.lease(None, now, 0);
                return match api.create(&post_params(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(e) => conflict_is_loss(e.into()),
                };
            }
            LeaseAction::Renew => {
                let mut lease = existing.ok_or_else(|| Error::internal("lease vanished"))?;
                if let Some(spec) = lease.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                lease
            }
            LeaseAction::TakeOver { transitions } => {
                let rv = existing.and_then(|l| l.metadata.resource_version);
                if rv.is_none() {
                    return Err(Error::internal("lease missing resourceVersion"));
                }
                info!(identity = %self.identity, transitions = transitions + 1, "taking over expired lease");
                self.lease(rv, now, transitions + 1)
            }
        };

        match api.replace(&self.lease_name, &post_params(), &lease).await {
            Ok(_) => Ok(true),
            Err(e) => conflict_is_loss(e.into()),
        }
    }

    fn lease(&self, resource_version: Option<String>, now: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, "leadership lost");
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// Another replica won the write race
fn conflict_is_loss(e: Error) -> Result<bool> {
    if e.is_conflict() {
        Ok(false)
    } else {
        Err(e)
    }
}

/// Held while this replica leads; renewal stops when it is dropped
pub struct LeaderGuard {
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed_secs_ago: i64, duration: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                resource_version: Some("9".to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: holder.map(str::to_string),
                lease_duration_seconds: Some(duration),
                renew_time: Some(MicroTime(
                    Utc::now() - chrono::Duration::seconds(renewed_secs_ago),
                )),
                lease_transitions: Some(3),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn missing_lease_is_created() {
        assert_eq!(decide(None, "a", Utc::now()), LeaseAction::Create);
    }

    #[test]
    fn own_lease_is_renewed() {
        let held = lease(Some("a"), 100, 15);
        assert_eq!(decide(Some(&held), "a", Utc::now()), LeaseAction::Renew);
    }

    #[test]
    fn live_lease_of_another_replica_is_respected() {
        let held = lease(Some("b"), 2, 15);
        assert_eq!(decide(Some(&held), "a", Utc::now()), LeaseAction::Wait);
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let stale = lease(Some("b"), 60, 15);
        assert_eq!(
            decide(Some(&stale), "a", Utc::now()),
            LeaseAction::TakeOver { transitions: 3 }
        );
    }

    #[test]
    fn lease_without_timing_counts_as_expired() {
        let mut odd = lease(Some("b"), 0, 15);
        odd.spec.as_mut().unwrap().renew_time = None;
        assert!(matches!(
            decide(Some(&odd), "a", Utc::now()),
            LeaseAction::TakeOver { .. }
        ));
    }
}
