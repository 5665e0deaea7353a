#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use notificator::domain::{Alert, Choice, Responder, ResponderRegistry};
use notificator::escalation::{EscalationTransport, SelectionReply};
use notificator::listener::Listener;
use notificator::notifier::{Notifier, NotifyError};
use notificator::queue::AlertQueue;
use notificator::{Error, Result};

pub fn registry() -> Arc<ResponderRegistry> {
    Arc::new(
        ResponderRegistry::new(vec![
            Responder::new("Alice", "+1"),
            Responder::new("Bob", "+2"),
        ])
        .unwrap(),
    )
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub responder: Responder,
    pub texts: Vec<String>,
    pub at: Instant,
}

#[derive(Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingNotifier {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(
        &self,
        responder: &Responder,
        alerts: &[Alert],
    ) -> std::result::Result<(), NotifyError> {
        self.deliveries.lock().push(Delivery {
            responder: responder.clone(),
            texts: alerts.iter().map(|a| a.text.clone()).collect(),
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Answers each round with the next phone of a queue of answers.
pub struct QueuedTransport {
    answers: Mutex<Vec<String>>,
}

impl QueuedTransport {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().rev().map(|a| a.to_string()).collect()),
        }
    }
}

#[async_trait]
impl EscalationTransport for QueuedTransport {
    fn name(&self) -> &str {
        "queued"
    }

    async fn present(
        &self,
        _choices: Vec<Choice>,
        reply: SelectionReply,
        _round: CancellationToken,
    ) -> Result<()> {
        let answer = self.answers.lock().pop();
        match answer {
            Some(answer) => {
                reply.send(answer).await;
                Ok(())
            }
            None => Err(Error::escalation("no more answers")),
        }
    }
}

/// Emits scripted alerts at offsets from the start of `listen`, then blocks
/// until closed.
pub struct ScriptedListener {
    name: String,
    queue: AlertQueue,
    script: Vec<(Duration, Alert)>,
    fail_close: bool,
    stop: Mutex<Option<CancellationToken>>,
    pub listens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl ScriptedListener {
    pub fn new(name: &str, queue: AlertQueue, script: Vec<(Duration, Alert)>) -> Self {
        Self {
            name: name.to_string(),
            queue,
            script,
            fail_close: false,
            stop: Mutex::new(None),
            listens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn listens(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.stop.lock().is_some()
    }
}

#[async_trait]
impl Listener for ScriptedListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn listen(&self, cancel: CancellationToken) -> Result<()> {
        self.listens.fetch_add(1, Ordering::SeqCst);
        let stop = cancel.child_token();
        *self.stop.lock() = Some(stop.clone());

        let started = Instant::now();
        for (offset, alert) in &self.script {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(started + *offset) => {}
            }
            self.queue.push(alert.clone())?;
        }

        stop.cancelled().await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = self.stop.lock().take() {
            stop.cancel();
        }
        if self.fail_close {
            return Err(Error::listener(self.name.clone(), "socket already closed"));
        }
        Ok(())
    }
}
