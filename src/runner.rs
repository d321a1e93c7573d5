//! Controller runner - builds the AgentCard and AgentPolicy controller futures
//!
//! Each controller watches its primary kind and the records it owns, so a
//! generated record edited or deleted out of band is put back on the next
//! pass. The policy controller also watches AgentCards through
//! [`policies_for_card`] so new or relabelled cards pick up policy.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::DynamicObject;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{debug, error, info};

use crate::controller::{agent_card, agent_policy, error_policy, Context};
use crate::crd::{AgentCard, AgentPolicy};
use crate::index::policies_for_card;
use crate::metrics::measured;
use crate::registry::DownstreamKind;
use crate::{LABEL_MANAGED_BY, MANAGED_BY_VALUE};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Owned records are only ever ones this controller labelled
fn owned_config() -> WatcherConfig {
    watcher_config().labels(&format!("{LABEL_MANAGED_BY}={MANAGED_BY_VALUE}"))
}

/// Controller futures boxed for joint execution
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build both controllers; each stops on SIGTERM/SIGINT
pub fn build_controllers(client: Client, ctx: Arc<Context>) -> Vec<ControllerFuture> {
    vec![
        build_card_controller(client.clone(), ctx.clone()),
        build_policy_controller(client, ctx),
    ]
}

fn build_card_controller(client: Client, ctx: Arc<Context>) -> ControllerFuture {
    let cards: Api<AgentCard> = Api::all(client.clone());
    let mut controller = Controller::new(cards, watcher_config());

    for kind in [DownstreamKind::HttpRoute, DownstreamKind::McpServerRegistration] {
        match ctx.registry.lookup(kind) {
            Some(ar) => {
                info!(%kind, "AgentCard controller owns");
                let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);
                controller = controller.owns_with(api, ar, owned_config());
            }
            None => info!(%kind, "kind not installed, not watching"),
        }
    }

    Box::pin(
        controller
            .shutdown_on_signal()
            .run(
                |card, ctx| measured("AgentCard", agent_card::reconcile(card, ctx)),
                error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("AgentCard")),
    )
}

fn build_policy_controller(client: Client, ctx: Arc<Context>) -> ControllerFuture {
    let policies: Api<AgentPolicy> = Api::all(client.clone());
    let mut controller = Controller::new(policies, watcher_config())
        .owns(Api::<ConfigMap>::all(client.clone()), owned_config())
        .owns(Api::<NetworkPolicy>::all(client.clone()), owned_config());

    for kind in [DownstreamKind::AuthPolicy, DownstreamKind::RateLimitPolicy] {
        if let Some(ar) = ctx.registry.lookup(kind) {
            info!(%kind, "AgentPolicy controller owns");
            let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);
            controller = controller.owns_with(api, ar, owned_config());
        }
    }

    let store = controller.store();
    let cards: Api<AgentCard> = Api::all(client);
    let controller = controller.watches(cards, watcher_config(), move |card| {
        let policies = store.state();
        let affected = policies_for_card(&card, policies.iter().map(|p| p.as_ref()));
        debug!(
            card = ?card.metadata.name,
            affected = affected.len(),
            "AgentCard changed, waking matching policies"
        );
        affected
    });

    Box::pin(
        controller
            .shutdown_on_signal()
            .run(
                |policy, ctx| measured("AgentPolicy", agent_policy::reconcile(policy, ctx)),
                error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("AgentPolicy")),
    )
}

/// Log the outcome of a controller reconciliation
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
