//! Telegram listener: chat messages seen by a bot become alerts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Activation, Listener};
use crate::domain::Alert;
use crate::queue::AlertQueue;
use crate::telegram::{DEFAULT_API_URL, Message, TelegramClient};
use crate::{Error, Result};

pub const TELEGRAM_CHANNEL: &str = "telegram";

/// Back-off after a failed `getUpdates` call.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramListenerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub bot_token: String,
    /// Chat ids to accept messages from. Empty accepts every chat.
    #[serde(default)]
    pub chats: Vec<i64>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

pub struct TelegramListener {
    name: String,
    config: TelegramListenerConfig,
    client: TelegramClient,
    queue: AlertQueue,
    activation: Activation,
}

impl TelegramListener {
    pub fn new(config: TelegramListenerConfig, index: usize, queue: AlertQueue) -> Self {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("telegram-{index}"));
        let client = TelegramClient::new(&config.api_url, &config.bot_token);

        Self {
            name,
            config,
            client,
            queue,
            activation: Activation::default(),
        }
    }

    /// Alert for `message`, if it is a text message from an accepted chat
    /// sent after `since`.
    fn alert(&self, message: &Message, since: i64) -> Option<Alert> {
        if message.date < since {
            return None;
        }
        if !self.config.chats.is_empty() && !self.config.chats.contains(&message.chat.id) {
            return None;
        }
        let text = message.text.as_ref()?;
        let from = message
            .from
            .as_ref()
            .map(|user| user.display_name())
            .unwrap_or_default();

        Some(Alert::new(TELEGRAM_CHANNEL, from, text.clone()).with_chat(message.chat.display_name()))
    }
}

#[async_trait]
impl Listener for TelegramListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn listen(&self, cancel: CancellationToken) -> Result<()> {
        let stop = self.activation.begin(&cancel);
        let since = Utc::now().timestamp();
        let poll_timeout = Duration::from_secs(self.config.poll_timeout_secs);
        let mut offset = 0;

        info!(listener = %self.name, chats = ?self.config.chats, "Listening for Telegram messages");

        loop {
            let updates = tokio::select! {
                _ = stop.cancelled() => break,
                updates = self.client.get_updates(offset, poll_timeout, &["message"]) => updates,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(listener = %self.name, error = %e, "Failed to poll Telegram updates");
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                let Some(alert) = update.message.as_ref().and_then(|m| self.alert(m, since)) else {
                    continue;
                };

                match self.queue.push(alert) {
                    Ok(outcome) => debug!(listener = %self.name, ?outcome, "Pushed Telegram alert"),
                    Err(Error::QueueClosed) => {
                        warn!(listener = %self.name, "Alert queue closed, stop listening");
                        self.activation.end();
                        return Ok(());
                    }
                    Err(e) => return Err(Error::listener(self.name.clone(), e.to_string())),
                }
            }
        }

        info!(listener = %self.name, "Telegram listener stopped");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.activation.end() {
            debug!(listener = %self.name, "Telegram listener already closed");
        }
        Ok(())
    }
}
