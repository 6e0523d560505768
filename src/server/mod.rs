//! HTTP surface of the services. One binary serves any role; the role decides
//! which routes are mounted.

pub mod response;
pub mod routes;
pub mod state;

pub use routes::{handle, Route};
pub use state::{AppState, Ports};

use crate::utils::error::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Serves `state` on `addr` until `shutdown` resolves.
pub async fn serve<F>(state: Arc<AppState>, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let make_svc = make_service_fn(move |_| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| handle(req, state.clone())))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    tracing::info!("Listening on http://{}", server.local_addr());
    server.with_graceful_shutdown(shutdown).await?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
