//! Minimal Telegram Bot API client.
//!
//! Handles 429 rate limits by respecting `parameters.retry_after`.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::types::{ApiResponse, InlineKeyboardButton, Message, Update};
use crate::utils::http_client;
use crate::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Timeout of regular (non long-poll) calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack added on top of the server-side long-poll timeout.
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, bot_token: &str) -> Self {
        Self {
            // Per-request timeouts, long polls outlive any fixed client timeout.
            client: http_client::build_client(Duration::ZERO),
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, method);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(&url)
                .timeout(timeout)
                .json(payload)
                .send()
                .await
                .map_err(|e| Error::Other(format!("Telegram {method} request failed: {e}")))?;

            let status = response.status();
            let body: ApiResponse<T> = response
                .json()
                .await
                .map_err(|e| Error::Other(format!("Telegram {method} returned {status}: {e}")))?;

            if body.ok {
                return body
                    .result
                    .ok_or_else(|| Error::Other(format!("Telegram {method} returned no result")));
            }

            if status.as_u16() == 429 && attempts < MAX_RATE_LIMIT_RETRIES {
                let wait = body
                    .parameters
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs)
                    .unwrap_or(Duration::from_secs(1));
                debug!(
                    method,
                    ?wait,
                    attempts, "Telegram rate limited (429), waiting before retry"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            return Err(Error::Other(format!(
                "Telegram {method} failed: {status} - {}",
                body.description.unwrap_or_default()
            )));
        }
    }

    /// Send a text message, optionally with an inline keyboard.
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<Vec<Vec<InlineKeyboardButton>>>,
    ) -> Result<Message> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(keyboard) = keyboard {
            payload["reply_markup"] = json!({ "inline_keyboard": keyboard });
        }

        self.call("sendMessage", &payload, REQUEST_TIMEOUT).await
    }

    /// Replace the text of a sent message and drop its keyboard.
    pub async fn edit_message_text(&self, chat_id: &str, message_id: i64, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });

        // `result` is the edited message or `true` depending on the chat.
        self.call::<serde_json::Value>("editMessageText", &payload, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str, text: Option<&str>) -> Result<()> {
        let mut payload = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }

        self.call::<bool>("answerCallbackQuery", &payload, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    /// Long-poll for updates starting at `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
        allowed_updates: &[&str],
    ) -> Result<Vec<Update>> {
        let payload = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": allowed_updates,
        });

        self.call("getUpdates", &payload, timeout + POLL_GRACE).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use serde_json::Value;

    use super::*;

    async fn spawn_api(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_send_message_with_keyboard() {
        let app = Router::new().route(
            "/{bot}/sendMessage",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["reply_markup"]["inline_keyboard"][0][0]["callback_data"], "+1");
                Json(json!({
                    "ok": true,
                    "result": {
                        "message_id": 77,
                        "chat": {"id": 5, "type": "private"},
                        "text": body["text"],
                    }
                }))
            }),
        );
        let client = TelegramClient::new(&spawn_api(app).await, "token");

        let keyboard = vec![vec![InlineKeyboardButton {
            text: "Alice".to_string(),
            callback_data: "+1".to_string(),
        }]];
        let message = client
            .send_message("5", "Choose technical", Some(keyboard))
            .await
            .unwrap();

        assert_eq!(message.message_id, 77);
        assert_eq!(message.text.as_deref(), Some("Choose technical"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/{bot}/answerCallbackQuery",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            StatusCode::TOO_MANY_REQUESTS,
                            Json(json!({
                                "ok": false,
                                "description": "Too Many Requests",
                                "parameters": {"retry_after": 0}
                            })),
                        )
                    } else {
                        (StatusCode::OK, Json(json!({"ok": true, "result": true})))
                    }
                }),
            )
            .with_state(hits.clone());
        let client = TelegramClient::new(&spawn_api(app).await, "token");

        client.answer_callback_query("cb", None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let app = Router::new().route(
            "/{bot}/getUpdates",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(json!({"ok": false, "description": "Conflict: terminated by other getUpdates request"})),
                )
            }),
        );
        let client = TelegramClient::new(&spawn_api(app).await, "token");

        let err = client
            .get_updates(0, Duration::from_secs(1), &["message"])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Conflict"));
    }
}
