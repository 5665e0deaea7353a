//! Telegram Bot API access shared by the telegram listener and escalation.

mod client;
mod types;

pub use client::{DEFAULT_API_URL, TelegramClient};
pub use types::{CallbackQuery, Chat, InlineKeyboardButton, Message, Update, User};
