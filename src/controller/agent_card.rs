//! AgentCard reconciler
//!
//! Publishes each card on the shared gateway: one HTTPRoute always, plus an
//! MCPServerRegistration when the agent speaks `mcp` and the MCP gateway is
//! installed. Status records the route name and a Ready condition.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::{ensure_finalizer, require_namespace, tolerate_status_conflict, Context, FinalizerState};
use crate::apply::{apply, ApplyStage};
use crate::compiler::ResourceCompiler;
use crate::crd::{set_condition, AgentCard, AgentCardStatus, Condition};
use crate::kube_client::PrimaryKind;
use crate::resources::DownstreamResource;
use crate::{Error, Result, AGENT_CARD_FINALIZER};

/// Condition reasons written to AgentCard status
pub mod reason {
    /// Everything generated
    pub const RECONCILED: &str = "Reconciled";
    /// The HTTPRoute could not be created
    pub const HTTP_ROUTE_CREATE_FAILED: &str = "HTTPRouteCreateFailed";
    /// The HTTPRoute could not be read or updated
    pub const HTTP_ROUTE_UPDATE_FAILED: &str = "HTTPRouteUpdateFailed";
    /// The MCP gateway rejected the registration
    pub const MCP_REGISTRATION_FAILED: &str = "MCPRegistrationFailed";
    /// The card is missing data needed to build anything
    pub const INVALID_RECORD: &str = "InvalidRecord";
}

/// Reconcile an AgentCard
#[instrument(skip(card, ctx), fields(record = %card.name_any(), namespace = %card.namespace().unwrap_or_default()))]
pub async fn reconcile(card: Arc<AgentCard>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = require_namespace(card.as_ref())?;
    let name = card.name_any();

    let Some(card) = ctx.kube.get_agent_card(&namespace, &name).await? else {
        debug!("agent card no longer exists");
        return Ok(Action::await_change());
    };

    let resource_version = match ensure_finalizer(
        ctx.kube.as_ref(),
        PrimaryKind::AgentCard,
        &card,
        AGENT_CARD_FINALIZER,
    )
    .await?
    {
        FinalizerState::Active { resource_version } => resource_version,
        FinalizerState::Released => return Ok(Action::await_change()),
    };

    info!("reconciling agent card");
    let writer = StatusWriter {
        ctx: &ctx,
        card: &card,
        namespace: &namespace,
        resource_version,
    };
    let compiler = ResourceCompiler::new(&ctx.config);

    let route = match compiler.http_route(&card) {
        Ok(route) => route,
        Err(e) => {
            warn!(error = %e, "agent card cannot be published");
            writer
                .write(None, Condition::not_ready(reason::INVALID_RECORD, e.to_string()))
                .await?;
            return Err(e);
        }
    };
    let route_name = route.metadata.name.clone();

    let desired = DownstreamResource::HttpRoute(route);
    if let Err(e) = apply(ctx.kube.as_ref(), &ctx.registry, &desired).await {
        let why = match e.stage {
            ApplyStage::Create => reason::HTTP_ROUTE_CREATE_FAILED,
            ApplyStage::Resolve | ApplyStage::Read | ApplyStage::Update => {
                reason::HTTP_ROUTE_UPDATE_FAILED
            }
        };
        let err = Error::apply(desired.kind().kind_str(), &route_name, e.source);
        writer
            .write(None, Condition::not_ready(why, err.to_string()))
            .await?;
        return Err(err);
    }

    if card.spec.is_mcp() {
        let registration = compiler
            .mcp_registration(&card, &route_name)
            .map(DownstreamResource::McpServerRegistration);
        let result = match registration {
            Ok(desired) => ctx.apply_tolerant(&desired).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            writer
                .write(
                    Some(&route_name),
                    Condition::not_ready(reason::MCP_REGISTRATION_FAILED, e.to_string()),
                )
                .await?;
            return Err(e);
        }
    }

    writer
        .write(
            Some(&route_name),
            Condition::ready(reason::RECONCILED, "AgentCard reconciled successfully"),
        )
        .await?;
    Ok(Action::await_change())
}

/// Writes card status guarded by the resourceVersion the reconcile started from
struct StatusWriter<'a> {
    ctx: &'a Context,
    card: &'a AgentCard,
    namespace: &'a str,
    resource_version: Option<String>,
}

impl StatusWriter<'_> {
    async fn write(&self, route_name: Option<&str>, condition: Condition) -> Result<()> {
        let mut status: AgentCardStatus = self.card.status.clone().unwrap_or_default();
        if let Some(route_name) = route_name {
            status.generated_http_route = Some(route_name.to_string());
        }
        set_condition(&mut status.conditions, condition);

        let name = self.card.name_any();
        let result = self
            .ctx
            .kube
            .patch_card_status(self.namespace, &name, self.resource_version.clone(), &status)
            .await;
        tolerate_status_conflict(result, &name)
    }
}
