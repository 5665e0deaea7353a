//! Generic webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    Notifier, NotifyError, default_retry_status_codes, error_from_response, error_from_transport,
};
use crate::domain::{Alert, Responder};
use crate::utils::http_client;

/// Webhook notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotifierConfig {
    /// Display name, `webhook-<index>` when unset.
    pub name: Option<String>,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Sent verbatim as the `Authorization` header.
    pub authorization: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Status code patterns reported as retryable (`x` matches any digit).
    #[serde(default = "default_retry_status_codes")]
    pub retry_status_codes: Vec<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookNotifierConfig {
    fn default() -> Self {
        Self {
            name: None,
            url: String::new(),
            method: default_method(),
            authorization: None,
            timeout_secs: default_timeout(),
            retry_status_codes: default_retry_status_codes(),
        }
    }
}

/// JSON body posted for every batch.
#[derive(Debug, Serialize)]
struct BatchPayload<'a> {
    responder: &'a Responder,
    alerts: &'a [Alert],
    count: usize,
    sent_at: String,
}

/// Posts each batch as JSON to a configured URL.
pub struct WebhookNotifier {
    name: String,
    config: WebhookNotifierConfig,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookNotifierConfig, index: usize) -> Self {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("webhook-{index}"));
        let client = http_client::build_client(Duration::from_secs(config.timeout_secs));

        Self {
            name,
            config,
            client,
        }
    }

    fn method(&self) -> Result<Method, NotifyError> {
        Method::from_bytes(self.config.method.to_uppercase().as_bytes()).map_err(|_| {
            NotifyError::permanent(format!("invalid webhook method '{}'", self.config.method))
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, responder: &Responder, alerts: &[Alert]) -> Result<(), NotifyError> {
        let payload = BatchPayload {
            responder,
            alerts,
            count: alerts.len(),
            sent_at: Utc::now().to_rfc3339(),
        };

        let mut request = self
            .client
            .request(self.method()?, &self.config.url)
            .json(&payload);
        if let Some(authorization) = &self.config.authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request
            .send()
            .await
            .map_err(|e| error_from_transport(&self.name, e))?;

        if !response.status().is_success() {
            return Err(
                error_from_response(&self.name, response, &self.config.retry_status_codes).await,
            );
        }

        debug!(notifier = %self.name, count = alerts.len(), "Webhook batch delivered");
        Ok(())
    }

    async fn check(&self) -> Result<(), NotifyError> {
        url::Url::parse(&self.config.url)
            .map_err(|e| NotifyError::permanent(format!("invalid webhook url: {e}")))?;
        self.method().map(|_| ())
    }
}
