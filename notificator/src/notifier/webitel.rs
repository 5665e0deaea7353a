//! Webitel call-center notifier.
//!
//! Every batch becomes a member of a Webitel queue whose destination is the
//! on-duty responder's phone, so the call center dials them. Alerts are passed
//! as member variables (`channel`, `alert-0`, `alert-1`, ...).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{
    Notifier, NotifyError, default_retry_status_codes, error_from_response, error_from_transport,
};
use crate::domain::{Alert, Responder};
use crate::utils::http_client;

/// Webitel authorization header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebitelAuthorization {
    #[serde(default = "default_auth_header")]
    pub header: String,
    pub value: String,
}

fn default_auth_header() -> String {
    "X-Webitel-Access".to_string()
}

/// Webitel notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebitelNotifierConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Engine API base URL, e.g. `https://cloud.webitel.ua/api`.
    pub url: String,
    pub authorization: Option<WebitelAuthorization>,
    /// Queue the member is created in.
    pub queue_id: i64,
    /// Communication type of the member destination (phone).
    pub type_id: i64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

pub struct WebitelNotifier {
    name: String,
    config: WebitelNotifierConfig,
    client: Client,
    retry_status_codes: Vec<String>,
}

impl WebitelNotifier {
    pub fn new(config: WebitelNotifierConfig, index: usize) -> Self {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("webitel-{index}"));
        let client = http_client::build_client(Duration::from_secs(config.timeout_secs));

        Self {
            name,
            config,
            client,
            retry_status_codes: default_retry_status_codes(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.authorization {
            Some(auth) => request.header(auth.header.as_str(), auth.value.as_str()),
            None => request,
        }
    }

    fn build_member(&self, responder: &Responder, alerts: &[Alert]) -> serde_json::Value {
        let mut variables = BTreeMap::new();
        if let Some(first) = alerts.first() {
            variables.insert("channel".to_string(), first.channel.clone());
        }
        for (i, alert) in alerts.iter().enumerate() {
            variables.insert(format!("alert-{i}"), alert.to_string());
        }

        json!({
            "name": format!("{}: {}", responder.name, Uuid::new_v4()),
            "communications": [{
                "destination": responder.address,
                "type": { "id": self.config.type_id.to_string() },
            }],
            "variables": variables,
        })
    }
}

#[async_trait]
impl Notifier for WebitelNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, responder: &Responder, alerts: &[Alert]) -> Result<(), NotifyError> {
        let member = self.build_member(responder, alerts);
        let url = self.endpoint(&format!(
            "/call_center/queues/{}/members",
            self.config.queue_id
        ));

        let response = self
            .authorize(self.client.post(&url))
            .json(&member)
            .send()
            .await
            .map_err(|e| error_from_transport("Webitel", e))?;

        if !response.status().is_success() {
            return Err(error_from_response("Webitel", response, &self.retry_status_codes).await);
        }

        info!(
            notifier = %self.name,
            member = %member["name"],
            destination = %responder.address,
            "Created Webitel member, waiting for a call"
        );
        Ok(())
    }

    /// Make sure the configured queue exists before accepting batches.
    async fn check(&self) -> Result<(), NotifyError> {
        let url = self.endpoint(&format!("/call_center/queues/{}", self.config.queue_id));
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| error_from_transport("Webitel", e))?;

        if !response.status().is_success() {
            return Err(error_from_response("Webitel", response, &self.retry_status_codes).await);
        }
        Ok(())
    }
}
