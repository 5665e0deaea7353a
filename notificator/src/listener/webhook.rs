use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Activation, Listener};
use crate::Result;
use crate::queue::AlertQueue;
use crate::server::{IngressRegistry, WebhookEndpoint, WebhookFields};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookListenerConfig {
    /// Path segment of the endpoint, unique across webhook listeners.
    pub name: String,
    pub token: String,
    #[serde(default)]
    pub fields: WebhookFields,
}

/// Accepts alerts on `{root}/{name}/{token}` while active.
pub struct WebhookListener {
    config: WebhookListenerConfig,
    queue: AlertQueue,
    ingress: IngressRegistry,
    activation: Activation,
}

impl WebhookListener {
    pub fn new(config: WebhookListenerConfig, queue: AlertQueue, ingress: IngressRegistry) -> Self {
        Self {
            config,
            queue,
            ingress,
            activation: Activation::default(),
        }
    }
}

#[async_trait]
impl Listener for WebhookListener {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn listen(&self, cancel: CancellationToken) -> Result<()> {
        let stop = self.activation.begin(&cancel);

        let endpoint = WebhookEndpoint {
            name: self.config.name.clone(),
            token: self.config.token.clone(),
            fields: self.config.fields.clone(),
            queue: self.queue.clone(),
        };
        let lease = self.ingress.register(endpoint);
        info!(listener = %self.config.name, "Webhook endpoint is accepting alerts");

        stop.cancelled().await;

        // A newer activation may own the endpoint by now.
        if self.ingress.deregister(&self.config.name, lease) {
            info!(listener = %self.config.name, "Webhook endpoint stopped");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.activation.end() {
            debug!(listener = %self.config.name, "Webhook listener already closed");
        }
        Ok(())
    }
}
