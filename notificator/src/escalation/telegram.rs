//! Telegram escalation: an inline keyboard of responders posted to a chat.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EscalationTransport, SelectionReply};
use crate::Result;
use crate::domain::{Choice, Responder};
use crate::telegram::{DEFAULT_API_URL, InlineKeyboardButton, TelegramClient};

const CHOOSE_PROMPT: &str = "Choose technical";

/// Back-off after a failed `getUpdates` call.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramEscalationConfig {
    pub bot_token: String,
    /// Chat the choices are posted to.
    pub chat_id: String,
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

pub struct TelegramEscalation {
    client: TelegramClient,
    chat_id: String,
    poll_timeout: Duration,
    /// Message carrying the keyboard of the latest round.
    prompt: Mutex<Option<i64>>,
}

impl TelegramEscalation {
    pub fn new(config: TelegramEscalationConfig) -> Self {
        Self {
            client: TelegramClient::new(&config.api_url, &config.bot_token),
            chat_id: config.chat_id,
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
            prompt: Mutex::new(None),
        }
    }

    fn keyboard(choices: &[Choice]) -> Vec<Vec<InlineKeyboardButton>> {
        choices
            .iter()
            .map(|choice| {
                vec![InlineKeyboardButton {
                    text: choice.label.clone(),
                    callback_data: choice.id.clone(),
                }]
            })
            .collect()
    }
}

#[async_trait]
impl EscalationTransport for TelegramEscalation {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn present(
        &self,
        choices: Vec<Choice>,
        reply: SelectionReply,
        round: CancellationToken,
    ) -> Result<()> {
        let message = self
            .client
            .send_message(&self.chat_id, CHOOSE_PROMPT, Some(Self::keyboard(&choices)))
            .await?;
        *self.prompt.lock() = Some(message.message_id);

        debug!(chat_id = %self.chat_id, message_id = message.message_id, "Posted on-duty keyboard");

        tokio::spawn(poll_answers(
            self.client.clone(),
            message.message_id,
            self.poll_timeout,
            reply,
            round,
        ));
        Ok(())
    }

    async fn confirm(&self, responder: &Responder) -> Result<()> {
        let Some(message_id) = *self.prompt.lock() else {
            return Ok(());
        };
        let text = format!("On duty: {} ({})", responder.name, responder.address);
        self.client
            .edit_message_text(&self.chat_id, message_id, &text)
            .await
    }
}

/// Forward button presses on `message_id` until the round ends.
async fn poll_answers(
    client: TelegramClient,
    message_id: i64,
    poll_timeout: Duration,
    reply: SelectionReply,
    round: CancellationToken,
) {
    let mut offset = 0;

    while !round.is_cancelled() && !reply.is_closed() {
        let updates = tokio::select! {
            _ = round.cancelled() => break,
            updates = client.get_updates(offset, poll_timeout, &["callback_query"]) => updates,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Failed to poll on-duty answers");
                tokio::select! {
                    _ = round.cancelled() => break,
                    _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);

            let Some(callback) = update.callback_query else {
                continue;
            };
            let on_prompt = callback
                .message
                .as_ref()
                .is_some_and(|m| m.message_id == message_id);
            let Some(data) = callback.data.filter(|_| on_prompt) else {
                let _ = client
                    .answer_callback_query(&callback.id, Some("This choice has expired"))
                    .await;
                continue;
            };

            info!(by = %callback.from.display_name(), choice = %data, "Received on-duty answer");
            if let Err(e) = client.answer_callback_query(&callback.id, None).await {
                debug!(error = %e, "Failed to answer callback query");
            }
            if !reply.send(data).await {
                return;
            }
        }
    }

    debug!(message_id, "Stopped polling on-duty answers");
}
