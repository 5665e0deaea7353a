//! Debounced alert queue.
//!
//! All listeners push into one [`AlertQueue`]. The queue groups bursts of
//! alerts within a `group_wait` window and fans each group out to every
//! notifier, addressed to the responder bound for the current window.
//!
//! # Dispatch cycle
//!
//! ```text
//!   push (idle)          group_wait elapsed        buffer empty
//!  ─────────────► Debouncing ──────────────► flush ─────────────► Idle
//!                   │   ▲                      │
//!        push       │   │   alerts arrived     │
//!   (append only)   └───┘   during flush ◄─────┘
//! ```
//!
//! With [`DispatchPolicy::FastFirst`] the alert that opens a cycle is delivered
//! immediately as a singleton batch; everything arriving during the window is
//! delivered as one catch-up batch when the timer fires. With
//! [`DispatchPolicy::Debounce`] the opening alert waits with the rest.
//!
//! Exactly one timer task exists per cycle and it is the only task that
//! delivers, so dispatches never overlap. The state lock is never held across
//! notifier I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::{Alert, Responder, RetryPolicy};
use crate::notifier::Notifier;
use crate::{Error, Result};

/// Default group wait (30 seconds).
pub const DEFAULT_GROUP_WAIT: Duration = Duration::from_secs(30);

/// How the alert that opens a cycle is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Deliver the first alert at once, then batch the rest of the window.
    #[default]
    FastFirst,
    /// Hold every alert until the window closes.
    Debounce,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct AlertQueueConfig {
    /// Length of the debounce window.
    pub group_wait: Duration,
    pub policy: DispatchPolicy,
    /// Applied per notifier to failures flagged as retryable.
    pub retry: RetryPolicy,
}

impl Default for AlertQueueConfig {
    fn default() -> Self {
        Self {
            group_wait: DEFAULT_GROUP_WAIT,
            policy: DispatchPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// What happened to a pushed alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Opened a new cycle and is being delivered right away.
    Dispatched,
    /// Held until the current window closes.
    Buffered,
    /// No responder is bound yet; the alert was discarded.
    Dropped,
}

/// Queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Debounce cycles started (one timer task each).
    pub cycles: u64,
    /// Batches handed to notifiers.
    pub batches: u64,
    /// Alerts delivered across all batches.
    pub alerts_dispatched: u64,
    /// Alerts dropped for lack of a bound responder.
    pub alerts_dropped: u64,
    /// Notifier deliveries that failed after retries.
    pub notifier_failures: u64,
}

struct QueueState {
    buffer: Vec<Alert>,
    /// True iff a timer task is outstanding.
    debouncing: bool,
    responder: Option<Responder>,
    closed: bool,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    batches: AtomicU64,
    alerts_dispatched: AtomicU64,
    alerts_dropped: AtomicU64,
    notifier_failures: AtomicU64,
}

struct Inner {
    config: AlertQueueConfig,
    notifiers: Vec<Arc<dyn Notifier>>,
    state: Mutex<QueueState>,
    counters: Counters,
}

/// Debounced, fan-out alert queue. Cheap to clone.
#[derive(Clone)]
pub struct AlertQueue {
    inner: Arc<Inner>,
}

impl AlertQueue {
    pub fn new(config: AlertQueueConfig, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                notifiers,
                state: Mutex::new(QueueState {
                    buffer: Vec::new(),
                    debouncing: false,
                    responder: None,
                    closed: false,
                    timer: None,
                }),
                counters: Counters::default(),
            }),
        }
    }

    /// Set the responder notified from now on.
    ///
    /// Must be called before listeners start for a window.
    pub fn bind(&self, responder: Responder) {
        info!(on_duty = %responder, "Bound on-duty responder to alert queue");
        self.inner.state.lock().responder = Some(responder);
    }

    pub fn bound_responder(&self) -> Option<Responder> {
        self.inner.state.lock().responder.clone()
    }

    /// Accept an alert from a listener.
    ///
    /// Fails with [`Error::QueueClosed`] once the queue is closed.
    pub fn push(&self, alert: Alert) -> Result<PushOutcome> {
        let mut state = self.inner.state.lock();

        if state.closed {
            return Err(Error::QueueClosed);
        }

        let Some(responder) = state.responder.clone() else {
            self.inner
                .counters
                .alerts_dropped
                .fetch_add(1, Ordering::Relaxed);
            warn!(alert = %alert, "No on-duty responder bound, dropping alert");
            return Ok(PushOutcome::Dropped);
        };

        debug!(channel = %alert.channel, from = %alert.from, text = %alert.text, "Push alert to queue");

        if state.debouncing {
            state.buffer.push(alert);
            return Ok(PushOutcome::Buffered);
        }

        state.debouncing = true;
        self.inner.counters.cycles.fetch_add(1, Ordering::Relaxed);

        let (first, outcome) = match self.inner.config.policy {
            DispatchPolicy::FastFirst => (Some((responder, vec![alert])), PushOutcome::Dispatched),
            DispatchPolicy::Debounce => {
                state.buffer.push(alert);
                (None, PushOutcome::Buffered)
            }
        };

        let deadline = Instant::now() + self.inner.config.group_wait;
        let inner = self.inner.clone();
        state.timer = Some(tokio::spawn(inner.run_cycle(first, deadline)));

        Ok(outcome)
    }

    /// Stop accepting alerts. Idempotent.
    ///
    /// An outstanding window still fires and flushes what it holds.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if !state.closed {
            state.closed = true;
            info!(pending = state.buffer.len(), "Alert queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Close the queue and wait for the outstanding window to flush.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.close();

        let timer = self.inner.state.lock().timer.take();
        let Some(timer) = timer else {
            return true;
        };

        match tokio::time::timeout(timeout, timer).await {
            Ok(_) => true,
            Err(_) => {
                warn!(?timeout, "Alert queue did not drain in time");
                false
            }
        }
    }

    pub fn is_debouncing(&self) -> bool {
        self.inner.state.lock().debouncing
    }

    /// Alerts waiting for the current window to close.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn notifier_count(&self) -> usize {
        self.inner.notifiers.len()
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.inner.counters;
        QueueStats {
            cycles: c.cycles.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
            alerts_dispatched: c.alerts_dispatched.load(Ordering::Relaxed),
            alerts_dropped: c.alerts_dropped.load(Ordering::Relaxed),
            notifier_failures: c.notifier_failures.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    /// Body of the single timer task of a cycle.
    async fn run_cycle(
        self: Arc<Self>,
        first: Option<(Responder, Vec<Alert>)>,
        mut deadline: Instant,
    ) {
        if let Some((responder, batch)) = first {
            info!(
                group_wait = ?self.config.group_wait,
                "Dispatching first alert of group, waiting for others"
            );
            self.dispatch(&responder, batch).await;
        }

        loop {
            tokio::time::sleep_until(deadline).await;

            let Some((responder, batch)) = self.take_pending() else {
                return;
            };
            deadline = Instant::now() + self.config.group_wait;
            self.dispatch(&responder, batch).await;

            // Alerts that landed during the flush get a window of their own.
            if !self.has_pending() {
                return;
            }
        }
    }

    /// Swap the buffer out, or end the cycle when there is nothing to send.
    fn take_pending(&self) -> Option<(Responder, Vec<Alert>)> {
        let mut state = self.state.lock();
        if state.buffer.is_empty() {
            state.debouncing = false;
            info!("Group wait finished, listening for new alerts");
            return None;
        }

        let batch = std::mem::take(&mut state.buffer);
        match state.responder.clone() {
            Some(responder) => Some((responder, batch)),
            None => {
                state.debouncing = false;
                self.counters
                    .alerts_dropped
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                warn!(count = batch.len(), "Responder unbound mid-cycle, dropping batch");
                None
            }
        }
    }

    /// Whether the cycle must continue; ends it otherwise.
    fn has_pending(&self) -> bool {
        let mut state = self.state.lock();
        if state.buffer.is_empty() {
            state.debouncing = false;
            info!("Group wait finished, listening for new alerts");
            false
        } else {
            true
        }
    }

    /// Deliver one batch to every notifier concurrently.
    async fn dispatch(&self, responder: &Responder, batch: Vec<Alert>) {
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .alerts_dispatched
            .fetch_add(batch.len() as u64, Ordering::Relaxed);

        debug!(count = batch.len(), on_duty = %responder, "Dispatching alert batch");

        let deliveries = self
            .notifiers
            .iter()
            .map(|notifier| self.deliver(notifier.as_ref(), responder, &batch));
        let delivered = join_all(deliveries).await;

        let failed = delivered.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            self.counters
                .notifier_failures
                .fetch_add(failed as u64, Ordering::Relaxed);
        }
    }

    /// Deliver to a single notifier, retrying retryable failures.
    async fn deliver(&self, notifier: &dyn Notifier, responder: &Responder, batch: &[Alert]) -> bool {
        let policy = &self.config.retry;
        let mut attempt = 0;

        loop {
            match notifier.notify(responder, batch).await {
                Ok(()) => {
                    debug!(notifier = notifier.name(), count = batch.len(), "Notification delivered");
                    return true;
                }
                Err(e) => {
                    error!(
                        notifier = notifier.name(),
                        error = %e,
                        retry = e.retryable,
                        attempt,
                        "Failed to send notification"
                    );

                    if !e.retryable || !policy.allows_retry(attempt) {
                        return false;
                    }

                    tokio::time::sleep(policy.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
