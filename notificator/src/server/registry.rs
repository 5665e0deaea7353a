//! Runtime table of active webhook endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Alert;
use crate::queue::AlertQueue;

/// Channel name of alerts received over HTTP.
pub const WEBHOOK_CHANNEL: &str = "webhook";

/// Request parameters the alert fields are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookFields {
    pub text: String,
    pub from: String,
    pub chat: String,
}

impl Default for WebhookFields {
    fn default() -> Self {
        Self {
            text: "text".to_string(),
            from: "from".to_string(),
            chat: "chat".to_string(),
        }
    }
}

/// One registered `{root}/{name}/{token}` endpoint.
pub struct WebhookEndpoint {
    pub name: String,
    pub token: String,
    pub fields: WebhookFields,
    pub queue: AlertQueue,
}

impl WebhookEndpoint {
    /// Build an alert from request parameters. `None` when the text is missing.
    pub fn alert(&self, params: &HashMap<String, String>) -> Option<Alert> {
        let text = params.get(&self.fields.text).filter(|t| !t.is_empty())?;
        let from = params
            .get(&self.fields.from)
            .cloned()
            .unwrap_or_else(|| self.name.clone());
        let chat = params.get(&self.fields.chat).cloned().unwrap_or_default();

        Some(Alert::new(WEBHOOK_CHANNEL, from, text.clone()).with_chat(chat))
    }
}

/// Identifies one registration of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLease(u64);

/// Endpoints are added when a webhook listener starts and removed on close.
///
/// A newer registration under the same name replaces the older one, and only
/// the holder of the current lease can remove it.
#[derive(Clone, Default)]
pub struct IngressRegistry {
    endpoints: Arc<RwLock<HashMap<String, (EndpointLease, Arc<WebhookEndpoint>)>>>,
    next_lease: Arc<AtomicU64>,
}

impl IngressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, endpoint: WebhookEndpoint) -> EndpointLease {
        let lease = EndpointLease(self.next_lease.fetch_add(1, Ordering::Relaxed));
        let name = endpoint.name.clone();
        if self
            .endpoints
            .write()
            .insert(name.clone(), (lease, Arc::new(endpoint)))
            .is_some()
        {
            debug!(endpoint = %name, "Webhook endpoint taken over by a new activation");
        }
        lease
    }

    /// Remove `name` if `lease` is still the current registration.
    ///
    /// Returns whether an endpoint was removed.
    pub fn deregister(&self, name: &str, lease: EndpointLease) -> bool {
        let mut endpoints = self.endpoints.write();
        match endpoints.get(name) {
            Some((current, _)) if *current == lease => {
                endpoints.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<WebhookEndpoint>> {
        self.endpoints
            .read()
            .get(name)
            .map(|(_, endpoint)| endpoint.clone())
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}
