//! On-duty selection.
//!
//! Before every activation window the [`EscalationManager`] presents the
//! responder registry through an [`EscalationTransport`] and blocks until a
//! human picks exactly one responder.
//!
//! Transports:
//! - `telegram`: inline keyboard in a chat, answered with a button press
//! - `fixed`: always selects the configured phone (unattended setups)

mod fixed;
mod manager;
mod telegram;

pub use fixed::FixedEscalation;
pub use manager::{EscalationFallback, EscalationManager, EscalationOptions, EscalationState};
pub use telegram::{TelegramEscalation, TelegramEscalationConfig};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::domain::{Choice, Responder};

/// Sending half of the reply channel of one selection round.
///
/// Each round gets a fresh channel. Once the round ends the receiver is gone
/// and [`SelectionReply::send`] returns `false`, so a late answer can never
/// leak into the next round.
#[derive(Debug, Clone)]
pub struct SelectionReply {
    tx: mpsc::Sender<String>,
}

impl SelectionReply {
    pub(crate) fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Forward the identifier picked by a human.
    ///
    /// Returns `false` when the round is already over.
    pub async fn send(&self, id: impl Into<String>) -> bool {
        self.tx.send(id.into()).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Interactive channel used to ask who is on duty.
#[async_trait]
pub trait EscalationTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Send the choice set and arrange for answers to reach `reply`.
    ///
    /// Returns once the choices are out. Any background work must stop when
    /// `round` is cancelled.
    async fn present(
        &self,
        choices: Vec<Choice>,
        reply: SelectionReply,
        round: CancellationToken,
    ) -> Result<()>;

    /// Announce the outcome of the round.
    async fn confirm(&self, _responder: &Responder) -> Result<()> {
        Ok(())
    }
}

/// `[escalation]` section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationConfig {
    Telegram(TelegramEscalationConfig),
    Fixed { phone: String },
}

pub fn build_transport(config: &EscalationConfig) -> Arc<dyn EscalationTransport> {
    match config {
        EscalationConfig::Telegram(c) => Arc::new(TelegramEscalation::new(c.clone())),
        EscalationConfig::Fixed { phone } => Arc::new(FixedEscalation::new(phone.clone())),
    }
}
