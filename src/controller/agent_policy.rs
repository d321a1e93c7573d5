//! AgentPolicy reconciler
//!
//! Fans a policy out over every AgentCard its selector matches. Per card it
//! writes an AuthPolicy and a RateLimitPolicy against the card's route; when
//! the policy has external rules a second pass writes the sidecar ConfigMap
//! and egress NetworkPolicy. One failing card never stops the others: all
//! failures are collected and reported together once the pass is done.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::{
    ensure_finalizer, require_namespace, tolerate_status_conflict, Context, FanOut,
    FinalizerState,
};
use crate::compiler::ResourceCompiler;
use crate::crd::{set_condition, AgentCard, AgentPolicy, Condition, GeneratedResource};
use crate::kube_client::PrimaryKind;
use crate::registry::DownstreamKind;
use crate::resources::{card_label_selector, DownstreamResource};
use crate::{Result, AGENT_POLICY_FINALIZER};

/// Condition reasons written to AgentPolicy status
pub mod reason {
    /// Every matched card was processed
    pub const RECONCILED: &str = "Reconciled";
    /// At least one downstream write failed
    pub const RECONCILE_ERRORS: &str = "ReconcileErrors";
    /// The namespace's AgentCards could not be listed
    pub const LIST_CARDS_FAILED: &str = "ListCardsFailed";
}

/// Reconcile an AgentPolicy
#[instrument(skip(policy, ctx), fields(record = %policy.name_any(), namespace = %policy.namespace().unwrap_or_default()))]
pub async fn reconcile(policy: Arc<AgentPolicy>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = require_namespace(policy.as_ref())?;
    let name = policy.name_any();

    let Some(policy) = ctx.kube.get_agent_policy(&namespace, &name).await? else {
        debug!("agent policy no longer exists");
        return Ok(Action::await_change());
    };

    let resource_version = match ensure_finalizer(
        ctx.kube.as_ref(),
        PrimaryKind::AgentPolicy,
        &policy,
        AGENT_POLICY_FINALIZER,
    )
    .await?
    {
        FinalizerState::Active { resource_version } => resource_version,
        FinalizerState::Released => return Ok(Action::await_change()),
    };

    let cards = match ctx.kube.list_agent_cards(&namespace).await {
        Ok(cards) => cards,
        Err(e) => {
            let mut status = policy.status.clone().unwrap_or_default();
            set_condition(
                &mut status.conditions,
                Condition::not_ready(reason::LIST_CARDS_FAILED, e.to_string()),
            );
            let result = ctx
                .kube
                .patch_policy_status(&namespace, &name, resource_version, &status)
                .await;
            tolerate_status_conflict(result, &name)?;
            return Err(e);
        }
    };

    let matched: Vec<AgentCard> = cards
        .into_iter()
        .filter(|card| policy.spec.agent_selector.matches(card.labels()))
        .collect();
    info!(matched = matched.len(), "reconciling agent policy");

    let compiler = ResourceCompiler::new(&ctx.config);
    let mut pass = FanOut::new();

    for card in &matched {
        let route_name = match find_route(&ctx, card).await {
            Ok(Some(route_name)) => route_name,
            Ok(None) => {
                debug!(card = %card.name_any(), "card has no route yet, skipping");
                continue;
            }
            Err(e) => {
                pass.fail(e);
                continue;
            }
        };

        if policy.spec.ingress.is_some() {
            let desired = compiler
                .auth_policy(&policy, card, &route_name)
                .map(DownstreamResource::AuthPolicy);
            pass.record(apply_generated(&ctx, desired).await);
        }
        if policy.spec.rate_limit.is_some() {
            let desired = compiler
                .rate_limit_policy(&policy, card, &route_name)
                .map(DownstreamResource::RateLimitPolicy);
            pass.record(apply_generated(&ctx, desired).await);
        }
    }

    if policy.spec.external.is_some() {
        for card in &matched {
            let desired = compiler
                .sidecar_config_map(&policy, card)
                .map(DownstreamResource::ConfigMap);
            pass.record(apply_generated(&ctx, desired).await);

            let desired = compiler
                .egress_network_policy(&policy, card)
                .map(DownstreamResource::NetworkPolicy);
            pass.record(apply_generated(&ctx, desired).await);
        }
    }

    let (generated, failure) = pass.finish();
    let mut status = policy.status.clone().unwrap_or_default();
    status.matched_agent_cards = i32::try_from(matched.len()).unwrap_or(i32::MAX);
    status.generated_resources = generated;
    let condition = match &failure {
        Some(e) => Condition::not_ready(reason::RECONCILE_ERRORS, e.to_string()),
        None => Condition::ready(reason::RECONCILED, "AgentPolicy reconciled successfully"),
    };
    set_condition(&mut status.conditions, condition);

    let result = ctx
        .kube
        .patch_policy_status(&namespace, &name, resource_version, &status)
        .await;
    tolerate_status_conflict(result, &name)?;

    match failure {
        Some(e) => {
            warn!(error = %e, "agent policy reconciled with errors");
            Err(e)
        }
        None => Ok(Action::await_change()),
    }
}

/// Name of the HTTPRoute the card controller generated for `card`, if any
async fn find_route(ctx: &Context, card: &AgentCard) -> Result<Option<String>> {
    let Some(ar) = ctx.registry.resolve(DownstreamKind::HttpRoute).await else {
        debug!("HTTPRoute kind not served, no routes to attach to");
        return Ok(None);
    };
    let namespace = require_namespace(card)?;
    let routes = ctx
        .kube
        .list_resources(&ar, &namespace, &card_label_selector(&card.name_any()))
        .await?;
    Ok(routes.into_iter().find_map(|route| route.metadata.name))
}

/// Apply one synthesized record and describe it for status
async fn apply_generated(
    ctx: &Context,
    desired: Result<DownstreamResource>,
) -> Result<Option<GeneratedResource>> {
    let desired = desired?;
    Ok(ctx
        .apply_tolerant(&desired)
        .await?
        .map(|_| GeneratedResource::new(desired.kind().kind_str(), desired.name())))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc as StdArc, Mutex};

    use kube::api::DynamicObject;
    use kube::discovery::ApiResource;

    use super::*;
    use crate::config::ControllerConfig;
    use crate::crd::{
        AgentCardSpec, AgentPolicySpec, AgentPolicyStatus, AgentSelector, ConditionStatus,
        ExternalRules, IngressRules, RateLimit,
    };
    use crate::error::api_error;
    use crate::kube_client::MockKubeClient;
    use crate::registry::KindRegistry;
    use crate::{Error, AGENT_CARD_FINALIZER, LABEL_AGENT_CARD};

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample_card(name: &str, team: &str) -> AgentCard {
        let mut card = AgentCard::new(
            name,
            AgentCardSpec {
                description: String::new(),
                skills: vec![],
                protocols: vec!["a2a".to_string()],
                service_port: None,
            },
        );
        card.metadata.namespace = Some("agents".to_string());
        card.metadata.uid = Some(format!("uid-{name}"));
        card.metadata.labels = Some(labels(&[("team", team)]));
        card.metadata.finalizers = Some(vec![AGENT_CARD_FINALIZER.to_string()]);
        card
    }

    fn sample_policy(spec: AgentPolicySpec) -> AgentPolicy {
        let mut policy = AgentPolicy::new("search-policy", spec);
        policy.metadata.namespace = Some("agents".to_string());
        policy.metadata.uid = Some("uid-policy".to_string());
        policy.metadata.resource_version = Some("3".to_string());
        policy.metadata.finalizers = Some(vec![AGENT_POLICY_FINALIZER.to_string()]);
        policy
    }

    fn full_spec() -> AgentPolicySpec {
        AgentPolicySpec {
            agent_selector: AgentSelector {
                match_labels: labels(&[("team", "search")]),
            },
            ingress: Some(IngressRules {
                allowed_agents: vec!["planner".to_string()],
                allowed_users: vec![],
            }),
            agents: vec![],
            external: None,
            rate_limit: Some(RateLimit {
                requests_per_minute: Some(100),
            }),
        }
    }

    fn route_for(ar: &ApiResource, card: &str) -> DynamicObject {
        let mut route = DynamicObject::new(&format!("agent-{card}"), ar).within("agents");
        route.metadata.labels = Some(labels(&[(LABEL_AGENT_CARD, card)]));
        route
    }

    /// Captures status patches for verification
    #[derive(Clone)]
    struct StatusCapture {
        updates: StdArc<Mutex<Vec<AgentPolicyStatus>>>,
    }

    impl StatusCapture {
        fn new() -> Self {
            Self {
                updates: StdArc::new(Mutex::new(Vec::new())),
            }
        }

        fn record(&self, status: AgentPolicyStatus) {
            self.updates.lock().unwrap().push(status);
        }

        fn last(&self) -> AgentPolicyStatus {
            self.updates
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("status should be written")
        }

        fn generated_kinds(&self) -> Vec<String> {
            self.last()
                .generated_resources
                .into_iter()
                .map(|r| format!("{}/{}", r.kind, r.name))
                .collect()
        }
    }

    /// Mock serving `policy` and `cards`, with a route for each card in `routed`
    fn mock_cluster(
        policy: &AgentPolicy,
        cards: Vec<AgentCard>,
        routed: &'static [&'static str],
        capture: &StatusCapture,
    ) -> MockKubeClient {
        let mut mock = MockKubeClient::new();
        let policy = policy.clone();
        mock.expect_get_agent_policy()
            .returning(move |_, _| Ok(Some(policy.clone())));
        mock.expect_list_agent_cards()
            .returning(move |_| Ok(cards.clone()));
        mock.expect_list_resources()
            .returning(move |ar, _, selector| {
                Ok(routed
                    .iter()
                    .filter(|card| selector.ends_with(&format!("={card}")))
                    .map(|card| route_for(ar, card))
                    .collect())
            });
        let capture = capture.clone();
        mock.expect_patch_policy_status()
            .returning(move |_, _, _, status| {
                capture.record(status.clone());
                Ok(())
            });
        mock
    }

    fn context(mock: MockKubeClient, kinds: &[DownstreamKind]) -> Arc<Context> {
        Arc::new(Context::for_testing(
            Arc::new(mock),
            Arc::new(KindRegistry::with_kinds(kinds)),
            ControllerConfig::new("agent-gateway", "gateway-system"),
        ))
    }

    const ALL_KINDS: &[DownstreamKind] = &[
        DownstreamKind::HttpRoute,
        DownstreamKind::AuthPolicy,
        DownstreamKind::RateLimitPolicy,
        DownstreamKind::McpServerRegistration,
    ];

    /// Story: a policy matching two routed cards protects both
    #[tokio::test]
    async fn story_policy_protects_every_matched_card() {
        let policy = sample_policy(full_spec());
        let capture = StatusCapture::new();
        let cards = vec![
            sample_card("web", "search"),
            sample_card("news", "search"),
            sample_card("billing", "payments"),
        ];
        let mut mock = mock_cluster(&policy, cards, &["web", "news", "billing"], &capture);
        mock.expect_get_resource().returning(|_, _, _| Ok(None));
        mock.expect_create_resource()
            .withf(|_, ns, obj| {
                let owner = &obj.metadata.owner_references.as_ref().unwrap()[0];
                ns == "agents" && owner.uid == "uid-policy" && owner.kind == "AgentPolicy"
            })
            .times(4)
            .returning(|_, _, _| Ok(()));

        let action = reconcile(Arc::new(policy), context(mock, ALL_KINDS))
            .await
            .expect("reconcile should succeed");

        assert_eq!(action, Action::await_change());
        let status = capture.last();
        assert_eq!(status.matched_agent_cards, 2);
        assert_eq!(
            capture.generated_kinds(),
            vec![
                "AuthPolicy/ap-web",
                "RateLimitPolicy/rlp-web",
                "AuthPolicy/ap-news",
                "RateLimitPolicy/rlp-news",
            ]
        );
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
        assert_eq!(status.conditions[0].reason, "Reconciled");
    }

    /// Story: a policy that matches nothing is still ready
    #[tokio::test]
    async fn story_policy_matching_nothing_is_ready() {
        let mut spec = full_spec();
        spec.external = Some(ExternalRules::default());
        let policy = sample_policy(spec);
        let capture = StatusCapture::new();
        let mock = mock_cluster(&policy, vec![sample_card("billing", "payments")], &[], &capture);

        reconcile(Arc::new(policy), context(mock, ALL_KINDS))
            .await
            .expect("reconcile should succeed");

        let status = capture.last();
        assert_eq!(status.matched_agent_cards, 0);
        assert!(status.generated_resources.is_empty());
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    /// Story: a card whose route does not exist yet is skipped quietly
    ///
    /// The card controller has not caught up; the AgentCard watch brings the
    /// policy back once the route appears.
    #[tokio::test]
    async fn story_card_without_route_is_skipped() {
        let policy = sample_policy(full_spec());
        let capture = StatusCapture::new();
        let cards = vec![sample_card("web", "search"), sample_card("news", "search")];
        let mut mock = mock_cluster(&policy, cards, &["news"], &capture);
        mock.expect_get_resource().returning(|_, _, _| Ok(None));
        mock.expect_create_resource()
            .times(2)
            .returning(|_, _, _| Ok(()));

        reconcile(Arc::new(policy), context(mock, ALL_KINDS))
            .await
            .expect("missing route is not an error");

        let status = capture.last();
        assert_eq!(status.matched_agent_cards, 2);
        assert_eq!(
            capture.generated_kinds(),
            vec!["AuthPolicy/ap-news", "RateLimitPolicy/rlp-news"]
        );
    }

    /// Story: without the Kuadrant CRDs the policy is ready and lists nothing
    #[tokio::test]
    async fn story_missing_kuadrant_is_tolerated() {
        let policy = sample_policy(full_spec());
        let capture = StatusCapture::new();
        let mock = mock_cluster(&policy, vec![sample_card("web", "search")], &["web"], &capture);

        reconcile(Arc::new(policy), context(mock, &[DownstreamKind::HttpRoute]))
            .await
            .expect("uninstalled kinds are skipped");

        let status = capture.last();
        assert_eq!(status.matched_agent_cards, 1);
        assert!(status.generated_resources.is_empty());
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    /// Story: a failed card listing marks the policy not ready
    ///
    /// Nothing is generated, but the previous Ready=True must not linger
    /// while the controller cannot see which cards the policy covers.
    #[tokio::test]
    async fn story_card_list_failure_is_reported() {
        let policy = sample_policy(full_spec());
        let capture = StatusCapture::new();
        let mut mock = MockKubeClient::new();
        let stored = policy.clone();
        mock.expect_get_agent_policy()
            .returning(move |_, _| Ok(Some(stored.clone())));
        mock.expect_list_agent_cards()
            .returning(|_| Err(api_error(500, "InternalError")));
        let seen = capture.clone();
        mock.expect_patch_policy_status()
            .withf(|ns, name, rv, _| {
                ns == "agents" && name == "search-policy" && rv.as_deref() == Some("3")
            })
            .times(1)
            .returning(move |_, _, _, status| {
                seen.record(status.clone());
                Ok(())
            });

        let err = reconcile(Arc::new(policy), context(mock, ALL_KINDS))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(500));
        let condition = &capture.last().conditions[0];
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "ListCardsFailed");
        assert_eq!(condition.message, err.to_string());
    }

    /// Story: one failing card does not stop the others
    ///
    /// Every failure lands in one aggregated Ready=False message, status
    /// still lists what succeeded, and the reconcile fails so it is retried.
    #[tokio::test]
    async fn story_partial_failure_is_aggregated() {
        let policy = sample_policy(full_spec());
        let capture = StatusCapture::new();
        let cards = vec![sample_card("web", "search"), sample_card("news", "search")];
        let mut mock = mock_cluster(&policy, cards, &["web", "news"], &capture);
        mock.expect_get_resource().returning(|_, _, _| Ok(None));
        mock.expect_create_resource().returning(|_, _, obj| {
            if obj.metadata.name.as_deref() == Some("ap-web") {
                Err(api_error(403, "Forbidden"))
            } else {
                Ok(())
            }
        });

        let err = reconcile(Arc::new(policy), context(mock, ALL_KINDS))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Aggregate { count: 1, .. }));
        let status = capture.last();
        assert_eq!(
            capture.generated_kinds(),
            vec![
                "RateLimitPolicy/rlp-web",
                "AuthPolicy/ap-news",
                "RateLimitPolicy/rlp-news",
            ]
        );
        let ready = &status.conditions[0];
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "ReconcileErrors");
        assert!(ready
            .message
            .starts_with("encountered 1 error(s) during reconciliation; failed to apply AuthPolicy ap-web"));
    }

    /// Story: external rules produce a sidecar config and egress policy per card
    #[tokio::test]
    async fn story_external_rules_configure_the_sidecar() {
        let mut spec = full_spec();
        spec.ingress = None;
        spec.rate_limit = None;
        spec.agents = vec!["planner".to_string()];
        spec.external = Some(ExternalRules::default());
        let policy = sample_policy(spec);
        let capture = StatusCapture::new();
        let mut mock = mock_cluster(&policy, vec![sample_card("web", "search")], &[], &capture);
        mock.expect_get_resource().returning(|_, _, _| Ok(None));
        mock.expect_create_resource()
            .times(2)
            .returning(|_, _, _| Ok(()));

        reconcile(Arc::new(policy), context(mock, &[DownstreamKind::HttpRoute]))
            .await
            .expect("reconcile should succeed");

        assert_eq!(
            capture.generated_kinds(),
            vec!["ConfigMap/sidecar-config-web", "NetworkPolicy/egress-web"]
        );
    }

    /// Story: a policy being deleted only releases its finalizer
    #[tokio::test]
    async fn story_deleted_policy_releases_finalizer_only() {
        let mut policy = sample_policy(full_spec());
        policy.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        let mut mock = MockKubeClient::new();
        let fetched = policy.clone();
        mock.expect_get_agent_policy()
            .returning(move |_, _| Ok(Some(fetched.clone())));
        mock.expect_patch_finalizers()
            .withf(|kind, _, _, _, finalizers| {
                *kind == PrimaryKind::AgentPolicy && finalizers.is_empty()
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(None));

        let action = reconcile(Arc::new(policy), context(mock, ALL_KINDS))
            .await
            .expect("deletion should succeed");
        assert_eq!(action, Action::await_change());
    }

    /// Story: a policy deleted before its reconcile ran is a no-op
    #[tokio::test]
    async fn story_missing_policy_is_a_no_op() {
        let mut mock = MockKubeClient::new();
        mock.expect_get_agent_policy().returning(|_, _| Ok(None));

        let action = reconcile(
            Arc::new(sample_policy(full_spec())),
            context(mock, ALL_KINDS),
        )
        .await
        .expect("missing policy is not an error");
        assert_eq!(action, Action::await_change());
    }
}
