//! HTTP server for the bridge.
//!
//! The server:
//! - Binds a TCP listener on the configured address
//! - Serves the read-only routes in [`routes`]
//! - Shuts down gracefully when the cancellation token fires
//!
//! # Panic-Free Guarantees
//!
//! Bind and serve failures are returned as [`ServerError`]; handlers only
//! copy data out of the shared state and cannot fail.

pub mod routes;

pub use routes::{router, HealthResponse};

use std::io;
use std::net::SocketAddr;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::state::BridgeState;

/// Errors from the HTTP server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read local address: {0}")]
    LocalAddr(#[source] io::Error),

    #[error("HTTP server failed: {0}")]
    Serve(#[source] io::Error),
}

/// A bound, not yet running, HTTP server.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    cancel_token: CancellationToken,
}

impl HttpServer {
    /// Binds `addr` and prepares the routes over `state`.
    pub async fn bind(
        addr: &str,
        state: BridgeState,
        cors_origins: &[String],
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            router: router(state, cors_origins),
            cancel_token,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Serves requests until the cancellation token fires.
    pub async fn run(self) -> Result<(), ServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, "HTTP server listening");
        }

        let cancel_token = self.cancel_token;
        axum::serve(self.listener, self.router.into_make_service())
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                debug!("HTTP server draining connections");
            })
            .await
            .map_err(ServerError::Serve)?;

        info!("HTTP server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .finish()
    }
}
