//! Outbound notification sinks.
//!
//! A [`Notifier`] receives a batch of alerts together with the responder on
//! duty. Failures carry a retryable flag that the alert queue feeds into its
//! retry policy.
//!
//! Available sinks:
//! - `stdout`: structured log line per batch
//! - `webhook`: generic HTTP JSON webhook
//! - `webitel`: call-center queue member creation (rings the responder)

mod stdout;
mod webhook;
mod webitel;

pub use stdout::LogNotifier;
pub use webhook::{WebhookNotifier, WebhookNotifierConfig};
pub use webitel::{WebitelAuthorization, WebitelNotifier, WebitelNotifierConfig};

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{Alert, Responder};

/// Failure reported by a notifier.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct NotifyError {
    /// Whether delivering the same batch again may succeed.
    pub retryable: bool,
    pub message: String,
}

impl NotifyError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// Trait for outbound notification sinks.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Instance name used in logs.
    fn name(&self) -> &str;

    /// Deliver `alerts` addressed to `responder`.
    async fn notify(&self, responder: &Responder, alerts: &[Alert]) -> Result<(), NotifyError>;

    /// Verify the sink is reachable and configured. Called once at startup.
    async fn check(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Notifier section of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifiersConfig {
    /// Log every batch at info level.
    #[serde(default)]
    pub stdout: bool,
    #[serde(default)]
    pub webhook: Vec<WebhookNotifierConfig>,
    #[serde(default)]
    pub webitel: Vec<WebitelNotifierConfig>,
}

impl NotifiersConfig {
    pub fn is_empty(&self) -> bool {
        !self.stdout && self.webhook.is_empty() && self.webitel.is_empty()
    }
}

/// Build every configured notifier, skipping the ones whose startup check fails.
pub async fn build_notifiers(config: &NotifiersConfig) -> Vec<Arc<dyn Notifier>> {
    let mut candidates: Vec<Arc<dyn Notifier>> = Vec::new();

    if config.stdout {
        candidates.push(Arc::new(LogNotifier::new("stdout")));
    }
    for (idx, c) in config.webhook.iter().enumerate() {
        candidates.push(Arc::new(WebhookNotifier::new(c.clone(), idx)));
    }
    for (idx, c) in config.webitel.iter().enumerate() {
        candidates.push(Arc::new(WebitelNotifier::new(c.clone(), idx)));
    }

    let mut notifiers = Vec::with_capacity(candidates.len());
    for notifier in candidates {
        match notifier.check().await {
            Ok(()) => {
                info!(notifier = notifier.name(), "Added notifier");
                notifiers.push(notifier);
            }
            Err(e) => {
                warn!(notifier = notifier.name(), error = %e, "Skipping notifier");
            }
        }
    }

    notifiers
}

pub(crate) fn default_retry_status_codes() -> Vec<String> {
    vec!["429".to_string(), "5xx".to_string()]
}

/// Whether `status` matches any pattern, where `x` matches any digit.
pub(crate) fn matches_status_pattern(status: StatusCode, patterns: &[String]) -> bool {
    let code = status.as_u16().to_string();
    patterns.iter().any(|pattern| {
        pattern.len() == code.len()
            && pattern
                .chars()
                .zip(code.chars())
                .all(|(p, c)| p.eq_ignore_ascii_case(&'x') || p == c)
    })
}

/// Turn a failed HTTP response into a [`NotifyError`].
pub(crate) async fn error_from_response(
    sink: &str,
    response: reqwest::Response,
    retry_status_codes: &[String],
) -> NotifyError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("{sink} request failed: {status} - {body}");

    if matches_status_pattern(status, retry_status_codes) {
        NotifyError::retryable(message)
    } else {
        NotifyError::permanent(message)
    }
}

/// Transport failures (connect, timeout) are worth retrying.
pub(crate) fn error_from_transport(sink: &str, error: reqwest::Error) -> NotifyError {
    NotifyError::retryable(format!("{sink} request failed: {error}"))
}
