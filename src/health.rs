//! Keep-alive HTTP endpoint for the hosting platform.

use std::net::SocketAddr;

use axum::{routing::get, Router};

use crate::error::{RaidGuardError, Result};

/// Liveness routes. Unauthenticated, static text.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(index_handler))
}

/// Serve the health routes until the listener fails.
pub async fn start_health_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(port = port, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        RaidGuardError::Io(format!("failed to bind health check port {}: {}", port, e))
    })?;

    axum::serve(listener, router())
        .await
        .map_err(|e| RaidGuardError::Io(format!("health check server failed: {}", e)))
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn index_handler() -> &'static str {
    "raidguard is running"
}

/// Spawn the health check server as a background task.
pub fn spawn_health_server(port: u16) {
    tokio::spawn(async move {
        if let Err(e) = start_health_server(port).await {
            tracing::error!(error = %e, "Health check server stopped");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_return_static_text() {
        assert_eq!(tokio_test::block_on(health_handler()), "OK");
        assert_eq!(tokio_test::block_on(index_handler()), "raidguard is running");
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router()).await;
        });

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("OK"));
    }
}
