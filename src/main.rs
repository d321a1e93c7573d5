//! Agent access control - controller process

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use kube::{Client, CustomResourceExt};

use agent_access_control::config::{holder_identity, lease_namespace, ControllerConfig, OsPodEnv};
use agent_access_control::controller::Context;
use agent_access_control::crd::{AgentCard, AgentPolicy};
use agent_access_control::health::{start_health_server, Readiness};
use agent_access_control::leader_election::LeaderElector;
use agent_access_control::metrics::{self, start_metrics_server};
use agent_access_control::registry::KindRegistry;
use agent_access_control::runner::build_controllers;
use agent_access_control::telemetry::{self, LogFormat};
use agent_access_control::{DEFAULT_ISSUER_URL, LEADER_ELECTION_ID};

/// Compiles AgentCards and AgentPolicies into gateway, auth, rate-limit,
/// egress and sidecar configuration
#[derive(Parser, Debug)]
#[command(name = "agent-access-control", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Gateway every generated HTTPRoute attaches to
    #[arg(long, env = "GATEWAY_NAME", required_unless_present = "crd")]
    gateway_name: Option<String>,

    /// Namespace of the gateway
    #[arg(long, env = "GATEWAY_NAMESPACE", default_value = "default")]
    gateway_namespace: String,

    /// OIDC issuer generated AuthPolicies trust
    #[arg(long, env = "ISSUER_URL", default_value = DEFAULT_ISSUER_URL)]
    issuer_url: String,

    /// Run controllers only while holding the leader lease
    #[arg(long, env = "LEADER_ELECT")]
    leader_elect: bool,

    /// Namespace of the leader lease (defaults to the pod's namespace)
    #[arg(long, env = "LEASE_NAMESPACE")]
    lease_namespace: Option<String>,

    /// Address serving /healthz and /readyz
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    health_probe_bind_address: SocketAddr,

    /// Address serving Prometheus metrics at /metrics
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let card = serde_yaml::to_string(&AgentCard::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize AgentCard CRD: {}", e))?;
        let policy = serde_yaml::to_string(&AgentPolicy::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize AgentPolicy CRD: {}", e))?;
        println!("{card}---\n{policy}");
        return Ok(());
    }

    telemetry::init(cli.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let gateway_name = cli
        .gateway_name
        .ok_or_else(|| anyhow::anyhow!("--gateway-name is required"))?;
    let config = ControllerConfig::new(gateway_name, cli.gateway_namespace)
        .with_issuer_url(cli.issuer_url);
    config.validate()?;

    let metrics_handle = metrics::install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;
    tokio::spawn(start_metrics_server(cli.metrics_bind_address, metrics_handle));

    let readiness = Readiness::default();
    tokio::spawn(start_health_server(
        cli.health_probe_bind_address,
        readiness.clone(),
    ));

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let mut leadership = if cli.leader_elect {
        let env = OsPodEnv;
        let namespace = cli.lease_namespace.unwrap_or_else(|| lease_namespace(&env));
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            LEADER_ELECTION_ID,
            &namespace,
            &holder_identity(&env),
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    let registry = Arc::new(KindRegistry::discover(client.clone()).await);
    let ctx = Arc::new(Context::new(client.clone(), registry, config));

    tracing::info!("Starting agent access controllers");
    let controllers = futures::future::join_all(build_controllers(client, ctx));
    readiness.set_ready();

    match leadership.as_mut() {
        Some(guard) => {
            tokio::select! {
                _ = controllers => tracing::info!("Controllers stopped"),
                _ = guard.lost() => {
                    anyhow::bail!("Leadership lost, exiting so a new leader can take over");
                }
            }
        }
        None => {
            controllers.await;
            tracing::info!("Controllers stopped");
        }
    }

    tracing::info!("Agent access controller shutting down");
    Ok(())
}
