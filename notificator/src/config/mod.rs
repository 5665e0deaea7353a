//! Application configuration.
//!
//! Loaded once at startup from a TOML file. [`AppConfig::validate`] rejects
//! everything that would otherwise fail at runtime: unparseable schedule
//! expressions, an empty or ambiguous responder registry, unknown timezones and
//! webhook listeners without an HTTP server.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Responder, ResponderRegistry, RetryPolicy};
use crate::escalation::{EscalationConfig, EscalationFallback, EscalationOptions};
use crate::listener::ListenersConfig;
use crate::logging::LogConfig;
use crate::notifier::NotifiersConfig;
use crate::queue::{AlertQueueConfig, DispatchPolicy};
use crate::scheduler::ScheduleExpression;
use crate::server::HttpConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// IANA timezone schedule expressions are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub log: LogConfig,
    /// Expressions that open an activation window.
    #[serde(default)]
    pub start: Vec<String>,
    /// Expressions that close an activation window.
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default = "default_group_wait_ms")]
    pub group_wait_ms: u64,
    #[serde(default)]
    pub dispatch: DispatchPolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Responder registry, in presentation order.
    #[serde(default)]
    pub technicals: Vec<Responder>,
    pub escalation: EscalationConfig,
    /// Unset waits for an answer indefinitely.
    #[serde(default)]
    pub escalation_timeout_secs: Option<u64>,
    #[serde(default)]
    pub escalation_fallback: EscalationFallback,
    pub http: Option<HttpConfig>,
    #[serde(default)]
    pub listeners: ListenersConfig,
    #[serde(default)]
    pub notifiers: NotifiersConfig,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_group_wait_ms() -> u64 {
    30_000
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl AppConfig {
    /// Read, parse and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse `path` without validating it.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate TOML content.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse configuration: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.start.is_empty() {
            return Err(Error::config("at least one start expression is required"));
        }
        for expression in self.start.iter().chain(&self.stop) {
            ScheduleExpression::parse(expression)?;
        }

        self.timezone()?;
        let registry = self.registry()?;

        if let EscalationConfig::Fixed { phone } = &self.escalation {
            if registry.find(phone).is_none() {
                return Err(Error::config(format!(
                    "fixed escalation phone '{phone}' is not one of the technicals"
                )));
            }
        }

        if !self.listeners.webhook.is_empty() && self.http.is_none() {
            return Err(Error::config("webhook listeners require an [http] section"));
        }
        let mut names = HashSet::new();
        for listener in &self.listeners.webhook {
            if !names.insert(listener.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate webhook listener name '{}'",
                    listener.name
                )));
            }
        }

        if self.listeners.is_empty() {
            warn!("No listeners configured, no alert will ever be received");
        }
        if self.notifiers.is_empty() {
            warn!("No notifiers configured, alerts will be discarded");
        }

        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.timezone.parse().map_err(|_| {
            Error::config(format!(
                "'{}' is not a valid IANA timezone",
                self.timezone
            ))
        })
    }

    pub fn registry(&self) -> Result<ResponderRegistry> {
        ResponderRegistry::new(self.technicals.clone())
    }

    pub fn group_wait(&self) -> Duration {
        Duration::from_millis(self.group_wait_ms)
    }

    pub fn queue_config(&self) -> AlertQueueConfig {
        AlertQueueConfig {
            group_wait: self.group_wait(),
            policy: self.dispatch,
            retry: self.retry.clone(),
        }
    }

    pub fn escalation_options(&self) -> EscalationOptions {
        EscalationOptions {
            timeout: self.escalation_timeout_secs.map(Duration::from_secs),
            fallback: self.escalation_fallback,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
