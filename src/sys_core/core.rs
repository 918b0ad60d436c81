//! Server loop: one hyper service per connection, all sharing one `FileApi`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::Server;
use hyper::service::{make_service_fn, service_fn};
use log::{info, warn};

use crate::sys_core::handlers::route;
use crate::sys_fileapi::core::FileApi;

/// Bind `addr` and serve until Ctrl-C.
pub async fn run_server(addr: SocketAddr, api: Arc<FileApi>) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let api = Arc::clone(&api);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let api = Arc::clone(&api);
                async move { Ok::<_, Infallible>(route(req, &api).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!("listening on http://{}", server.local_addr());

    server.with_graceful_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
