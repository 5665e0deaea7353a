//! HTTP ingress for webhook listeners.
//!
//! One server serves every webhook listener under `{root}/{name}/{token}`.
//! Listeners add their endpoint to the [`IngressRegistry`] while active, so a
//! request outside an activation window gets a 404.

mod registry;
mod routes;

pub use registry::{EndpointLease, IngressRegistry, WEBHOOK_CHANNEL, WebhookEndpoint, WebhookFields};
pub use routes::create_router;

use std::net::SocketAddr;
use std::time::Duration;

use axum::{Router, extract::Request};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{Span, info};

use crate::{Error, Result};

/// `[http]` section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Path prefix of webhook endpoints.
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_root() -> String {
    "/webhook".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            root: default_root(),
        }
    }
}

pub struct IngressServer {
    config: HttpConfig,
    registry: IngressRegistry,
    cancel_token: CancellationToken,
}

impl IngressServer {
    pub fn new(config: HttpConfig, registry: IngressRegistry, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            registry,
            cancel_token,
        }
    }

    fn build_router(&self) -> Router {
        create_router(self.registry.clone(), &self.config.root).layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    // Tokens are part of the path; keep them out of the logs.
                    tracing::info_span!("webhook", method = %req.method())
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, _span: &Span| {
                        info!(status = %res.status(), ?latency, "Handled webhook request");
                    },
                ),
        )
    }

    /// Serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .bind_address
            .parse()
            .map_err(|e| Error::config(format!("Invalid http.bind_address: {e}")))?;

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, root = %self.config.root, "Webhook server listening");

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("Webhook server shutting down...");
            })
            .await
            .map_err(|e| Error::Other(format!("Server error: {e}")))?;

        Ok(())
    }
}
