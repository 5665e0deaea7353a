//! Test doubles for the capability traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{Alert, Choice, Responder, ResponderRegistry};
use crate::escalation::{EscalationTransport, SelectionReply};
use crate::listener::Listener;
use crate::notifier::{Notifier, NotifyError};
use crate::queue::AlertQueue;
use crate::{Error, Result};

/// Alice (+1), Bob (+2).
pub fn registry() -> ResponderRegistry {
    ResponderRegistry::new(vec![
        Responder::new("Alice", "+1"),
        Responder::new("Bob", "+2"),
    ])
    .unwrap()
}

#[derive(Debug, Clone)]
pub struct Call {
    pub responder: Responder,
    pub alerts: Vec<Alert>,
    pub at: Instant,
}

impl Call {
    pub fn texts(&self) -> Vec<&str> {
        self.alerts.iter().map(|a| a.text.as_str()).collect()
    }
}

pub struct RecordingNotifier {
    name: String,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
}

impl RecordingNotifier {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Record each call on arrival, then take `delay` to return.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Wait (up to 10s) until at least `n` calls were recorded.
    pub async fn wait_for_calls(&self, n: usize) -> Vec<Call> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let calls = self.calls();
                if calls.len() >= n {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("notifier was not called in time")
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, responder: &Responder, alerts: &[Alert]) -> std::result::Result<(), NotifyError> {
        self.calls.lock().push(Call {
            responder: responder.clone(),
            alerts: alerts.to_vec(),
            at: Instant::now(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

/// Fails every delivery, or the first `n` with [`FailingNotifier::succeed_after`].
pub struct FailingNotifier {
    name: String,
    retryable: bool,
    failures: Option<usize>,
    attempts: AtomicUsize,
}

impl FailingNotifier {
    pub fn new(name: &str, retryable: bool) -> Self {
        Self {
            name: name.to_string(),
            retryable,
            failures: None,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn succeed_after(mut self, failures: usize) -> Self {
        self.failures = Some(failures);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for FailingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, _responder: &Responder, _alerts: &[Alert]) -> std::result::Result<(), NotifyError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures.is_some_and(|failures| attempt >= failures) {
            return Ok(());
        }
        Err(NotifyError {
            retryable: self.retryable,
            message: "sink unavailable".to_string(),
        })
    }
}

/// Escalation transport answering from a script.
pub struct ScriptedTransport {
    answers: Mutex<Vec<String>>,
    fail: bool,
    rounds: AtomicUsize,
    last_reply: Mutex<Option<SelectionReply>>,
    last_round: Mutex<Option<CancellationToken>>,
    confirmed: Mutex<Vec<Responder>>,
}

impl ScriptedTransport {
    fn with(answers: Vec<String>, fail: bool) -> Self {
        Self {
            answers: Mutex::new(answers),
            fail,
            rounds: AtomicUsize::new(0),
            last_reply: Mutex::new(None),
            last_round: Mutex::new(None),
            confirmed: Mutex::new(Vec::new()),
        }
    }

    pub fn answering<const N: usize>(answers: [&str; N]) -> Self {
        Self::with(answers.iter().map(|a| a.to_string()).collect(), false)
    }

    /// Never answers.
    pub fn silent() -> Self {
        Self::with(Vec::new(), false)
    }

    /// Fails to present.
    pub fn failing() -> Self {
        Self::with(Vec::new(), true)
    }

    /// Answers for the next round.
    pub fn script<const N: usize>(&self, answers: [&str; N]) {
        *self.answers.lock() = answers.iter().map(|a| a.to_string()).collect();
    }

    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::SeqCst)
    }

    pub fn last_reply(&self) -> Option<SelectionReply> {
        self.last_reply.lock().clone()
    }

    pub fn last_round(&self) -> Option<CancellationToken> {
        self.last_round.lock().clone()
    }

    pub fn confirmed(&self) -> Vec<Responder> {
        self.confirmed.lock().clone()
    }
}

#[async_trait]
impl EscalationTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn present(
        &self,
        _choices: Vec<Choice>,
        reply: SelectionReply,
        round: CancellationToken,
    ) -> Result<()> {
        if self.fail {
            return Err(Error::escalation("chat unreachable"));
        }
        self.rounds.fetch_add(1, Ordering::SeqCst);
        *self.last_round.lock() = Some(round);
        *self.last_reply.lock() = Some(reply.clone());

        let answers = std::mem::take(&mut *self.answers.lock());
        for answer in answers {
            reply.send(answer).await;
        }
        Ok(())
    }

    async fn confirm(&self, responder: &Responder) -> Result<()> {
        self.confirmed.lock().push(responder.clone());
        Ok(())
    }
}

/// Listener that optionally pushes one alert, then blocks until closed.
pub struct BlockingListener {
    name: String,
    fail_close: bool,
    emit: Mutex<Option<(AlertQueue, Alert)>>,
    stop: Mutex<Option<CancellationToken>>,
    listen_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl BlockingListener {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_close: false,
            emit: Mutex::new(None),
            stop: Mutex::new(None),
            listen_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn emit_on_start(&self, queue: AlertQueue, alert: Alert) {
        *self.emit.lock() = Some((queue, alert));
    }

    pub fn listen_calls(&self) -> usize {
        self.listen_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Listener for BlockingListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn listen(&self, cancel: CancellationToken) -> Result<()> {
        self.listen_calls.fetch_add(1, Ordering::SeqCst);
        let stop = cancel.child_token();
        *self.stop.lock() = Some(stop.clone());

        let emit = self.emit.lock().clone();
        if let Some((queue, alert)) = emit {
            queue.push(alert)?;
        }

        stop.cancelled().await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = self.stop.lock().take() {
            stop.cancel();
        }
        if self.fail_close {
            return Err(Error::listener(self.name.clone(), "connection reset"));
        }
        Ok(())
    }
}
