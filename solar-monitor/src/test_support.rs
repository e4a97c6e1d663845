use std::net::SocketAddr;

use axum::Router;

/// Serve `app` on an ephemeral localhost port for the lifetime of the test
/// runtime.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    addr
}
