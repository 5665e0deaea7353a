//! Selection round state machine.
//!
//! ```text
//! Idle → Presenting → AwaitingSelection → Selected
//!                                       ↘ TimedOut
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{EscalationTransport, SelectionReply};
use crate::domain::{Responder, ResponderRegistry};
use crate::{Error, Result};

/// Buffered answers per round; extra presses are dropped by the transport.
const REPLY_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Idle,
    Presenting,
    AwaitingSelection,
    Selected,
    TimedOut,
}

/// What to do when nobody answers in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationFallback {
    /// Put the first registry entry on duty.
    #[default]
    First,
    /// Fail the activation window.
    Abort,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EscalationOptions {
    /// `None` waits until answered or cancelled.
    pub timeout: Option<Duration>,
    pub fallback: EscalationFallback,
}

pub struct EscalationManager {
    registry: Arc<ResponderRegistry>,
    transport: Arc<dyn EscalationTransport>,
    options: EscalationOptions,
    state: Mutex<EscalationState>,
    /// Serializes rounds so the registry has a single writer.
    round_lock: tokio::sync::Mutex<()>,
}

impl EscalationManager {
    pub fn new(
        registry: Arc<ResponderRegistry>,
        transport: Arc<dyn EscalationTransport>,
        options: EscalationOptions,
    ) -> Self {
        Self {
            registry,
            transport,
            options,
            state: Mutex::new(EscalationState::Idle),
            round_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> EscalationState {
        *self.state.lock()
    }

    pub fn registry(&self) -> &Arc<ResponderRegistry> {
        &self.registry
    }

    fn set_state(&self, state: EscalationState) {
        *self.state.lock() = state;
    }

    /// Run one selection round and return the responder now on duty.
    ///
    /// Blocks until a valid answer arrives, the optional timeout elapses or
    /// `cancel` fires. The previous on-duty flag is cleared first.
    pub async fn select_on_duty(&self, cancel: &CancellationToken) -> Result<Responder> {
        let _round_guard = self.round_lock.lock().await;

        let result = self.run_round(cancel).await;
        if result.is_err() && self.state() != EscalationState::TimedOut {
            self.set_state(EscalationState::Idle);
        }
        result
    }

    async fn run_round(&self, cancel: &CancellationToken) -> Result<Responder> {
        self.registry.clear_on_duty();
        self.set_state(EscalationState::Presenting);

        let (tx, mut rx) = mpsc::channel(REPLY_CAPACITY);
        // Stops transport background work whichever way the round ends.
        let round = cancel.child_token();
        let _round_guard = round.clone().drop_guard();

        let choices = self.registry.choices();
        info!(
            transport = self.transport.name(),
            candidates = choices.len(),
            "Presenting on-duty choices"
        );

        tokio::select! {
            presented = self.transport.present(choices, SelectionReply::new(tx), round.clone()) => presented?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }

        self.set_state(EscalationState::AwaitingSelection);

        let timeout = self.options.timeout;
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let responder = loop {
            tokio::select! {
                answer = rx.recv() => {
                    let Some(id) = answer else {
                        return Err(Error::escalation(format!(
                            "{} transport stopped before a responder was selected",
                            self.transport.name()
                        )));
                    };
                    match self.registry.mark_on_duty(&id) {
                        Some(responder) => break responder,
                        None => warn!(id = %id, "Ignoring selection of unknown responder"),
                    }
                }
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = &mut deadline => {
                    // `timeout` is set, otherwise the deadline never completes.
                    let elapsed = timeout.unwrap_or_default();
                    self.set_state(EscalationState::TimedOut);
                    let responder = self.fall_back(elapsed)?;
                    self.confirm(&responder).await;
                    return Ok(responder);
                }
            }
        };

        // Single use: late answers for this round now fail to send.
        drop(rx);
        self.set_state(EscalationState::Selected);
        info!(on_duty = %responder, "Selected on-duty responder");

        self.confirm(&responder).await;
        Ok(responder)
    }

    /// Announce the on-duty responder through the transport. Failures only warn.
    async fn confirm(&self, responder: &Responder) {
        if let Err(e) = self.transport.confirm(responder).await {
            warn!(transport = self.transport.name(), error = %e, "Failed to confirm selection");
        }
    }

    fn fall_back(&self, elapsed: Duration) -> Result<Responder> {
        match self.options.fallback {
            EscalationFallback::First => {
                let first = self.registry.first().clone();
                self.registry.mark_on_duty(&first.address);
                warn!(
                    ?elapsed,
                    on_duty = %first,
                    "No on-duty selection in time, falling back to first responder"
                );
                Ok(first)
            }
            EscalationFallback::Abort => {
                warn!(?elapsed, "No on-duty selection in time, aborting window");
                Err(Error::EscalationTimedOut(elapsed))
            }
        }
    }
}
