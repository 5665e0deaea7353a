//! Inbound alert sources.
//!
//! A [`Listener`] pushes alerts into the [`AlertQueue`](crate::queue::AlertQueue)
//! while an activation window is open. `listen` blocks for the whole window;
//! `close` ends it.

mod telegram;
mod webhook;

pub use telegram::{TelegramListener, TelegramListenerConfig};
pub use webhook::{WebhookListener, WebhookListenerConfig};

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::queue::AlertQueue;
use crate::server::IngressRegistry;

#[async_trait]
pub trait Listener: Send + Sync {
    /// Instance name used in logs.
    fn name(&self) -> &str;

    /// Produce alerts until [`Listener::close`] is called or `cancel` fires.
    async fn listen(&self, cancel: CancellationToken) -> Result<()>;

    /// End the current `listen` call. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Stop token of the current activation.
///
/// Each `listen` call starts a fresh activation so a `close` from a previous
/// window never leaks into the next one.
#[derive(Default)]
pub(crate) struct Activation {
    current: Mutex<Option<CancellationToken>>,
}

impl Activation {
    pub(crate) fn begin(&self, cancel: &CancellationToken) -> CancellationToken {
        let token = cancel.child_token();
        if let Some(previous) = self.current.lock().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Returns whether an activation was running.
    pub(crate) fn end(&self) -> bool {
        match self.current.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// `[listeners]` section of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenersConfig {
    #[serde(default)]
    pub webhook: Vec<WebhookListenerConfig>,
    #[serde(default)]
    pub telegram: Vec<TelegramListenerConfig>,
}

impl ListenersConfig {
    pub fn is_empty(&self) -> bool {
        self.webhook.is_empty() && self.telegram.is_empty()
    }
}

pub fn build_listeners(
    config: &ListenersConfig,
    queue: &AlertQueue,
    ingress: &IngressRegistry,
) -> Vec<Arc<dyn Listener>> {
    let mut listeners: Vec<Arc<dyn Listener>> = Vec::new();

    for c in &config.webhook {
        listeners.push(Arc::new(WebhookListener::new(
            c.clone(),
            queue.clone(),
            ingress.clone(),
        )));
    }
    for (idx, c) in config.telegram.iter().enumerate() {
        listeners.push(Arc::new(TelegramListener::new(c.clone(), idx, queue.clone())));
    }

    listeners
}
