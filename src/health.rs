//! Liveness and readiness probes
//!
//! `/healthz` answers as soon as the process serves HTTP. `/readyz` answers
//! 200 only once the controllers are running, which for a follower means
//! never until it wins the lease.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::{error, info};

/// Shared readiness flag flipped by the process once controllers start
#[derive(Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    /// Mark the controllers as running
    pub fn set_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the controllers are running
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Build the probe router
pub fn health_routes(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(readiness)
}

async fn readyz(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Serve the probes until the process exits
pub async fn start_health_server(addr: SocketAddr, readiness: Readiness) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => {
            info!(addr = %addr, "health probe server started");
            l
        }
        Err(e) => {
            error!(error = %e, addr = %addr, "failed to bind health probe address");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, health_routes(readiness)).await {
        error!(error = %e, "health probe server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readyz_follows_the_flag() {
        let readiness = Readiness::default();
        let (code, _) = readyz(State(readiness.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        readiness.set_ready();
        let (code, body) = readyz(State(readiness)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
