//! Application root: wires configuration into running components.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::escalation::{EscalationManager, build_transport};
use crate::listener::{Listener, build_listeners};
use crate::notifier::build_notifiers;
use crate::queue::AlertQueue;
use crate::scheduler::{JobHandle, JobRunner, WindowJob, WindowScheduler};
use crate::server::{IngressRegistry, IngressServer};
use crate::{Error, Result};

/// Executes start and stop jobs.
///
/// A start job selects the on-duty responder, binds it to the queue and then
/// runs every listener until they all return. A stop job ends every open
/// window, including one still waiting for its escalation answer, and closes
/// every listener.
pub struct WindowJobRunner {
    escalation: Arc<EscalationManager>,
    queue: AlertQueue,
    listeners: Vec<Arc<dyn Listener>>,
    /// Scopes of the windows opened since the last stop.
    windows: Mutex<Vec<CancellationToken>>,
}

impl WindowJobRunner {
    pub fn new(
        escalation: Arc<EscalationManager>,
        queue: AlertQueue,
        listeners: Vec<Arc<dyn Listener>>,
    ) -> Self {
        Self {
            escalation,
            queue,
            listeners,
            windows: Mutex::new(Vec::new()),
        }
    }

    pub fn listeners(&self) -> &[Arc<dyn Listener>] {
        &self.listeners
    }

    fn begin_window(&self, cancel: &CancellationToken) -> CancellationToken {
        let window = cancel.child_token();
        let mut windows = self.windows.lock();
        windows.retain(|w| !w.is_cancelled());
        windows.push(window.clone());
        window
    }

    /// Body of a start job. Returns once every listener has returned.
    ///
    /// A stop that lands before the selection completes ends the window
    /// without starting any listener.
    pub async fn open_window(&self, cancel: &CancellationToken) -> Result<()> {
        let window = self.begin_window(cancel);
        let _window_guard = window.clone().drop_guard();

        let responder = match self.escalation.select_on_duty(&window).await {
            Ok(responder) => responder,
            Err(Error::Cancelled) if window.is_cancelled() => {
                info!("Window closed before a responder was selected");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if window.is_cancelled() {
            info!(on_duty = %responder, "Window closed before listeners started");
            return Ok(());
        }
        self.queue.bind(responder);

        let runs = self.listeners.iter().map(|listener| {
            let window = window.clone();
            async move {
                info!(listener = listener.name(), "Starting listener");
                (listener.name(), listener.listen(window).await)
            }
        });

        for (name, result) in join_all(runs).await {
            match result {
                Ok(()) => info!(listener = name, "Listener stopped"),
                Err(e) => error!(listener = name, error = %e, "Listener failed"),
            }
        }
        Ok(())
    }

    /// Body of a stop job. Every listener is closed even if some fail.
    pub async fn close_window(&self) -> Result<()> {
        for window in self.windows.lock().drain(..) {
            window.cancel();
        }

        let closes = self
            .listeners
            .iter()
            .map(|listener| async move { (listener.name(), listener.close().await) });

        let failures: Vec<String> = join_all(closes)
            .await
            .into_iter()
            .filter_map(|(name, result)| {
                result.err().map(|e| {
                    warn!(listener = name, error = %e, "Failed to close listener");
                    format!("{name}: {e}")
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "failed to close {} listener(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

#[async_trait]
impl JobRunner for WindowJobRunner {
    async fn run(&self, job: WindowJob, cancel: CancellationToken) -> Result<()> {
        match job {
            WindowJob::Start { .. } => self.open_window(&cancel).await,
            WindowJob::Stop { .. } => self.close_window().await,
        }
    }
}

pub struct Application {
    config: AppConfig,
    cancel_token: CancellationToken,
    queue: AlertQueue,
    runner: Arc<WindowJobRunner>,
    scheduler: WindowScheduler,
    server: Option<IngressServer>,
}

impl Application {
    /// Build every component from `config`.
    pub async fn build(config: AppConfig, cancel_token: CancellationToken) -> Result<Self> {
        let registry = Arc::new(config.registry()?);
        let transport = build_transport(&config.escalation);
        let escalation = Arc::new(EscalationManager::new(
            registry,
            transport,
            config.escalation_options(),
        ));

        let notifiers = build_notifiers(&config.notifiers).await;
        let queue = AlertQueue::new(config.queue_config(), notifiers);
        info!(notifiers = queue.notifier_count(), "Alert queue ready");

        let ingress = IngressRegistry::new();
        let listeners = build_listeners(&config.listeners, &queue, &ingress);
        let server = config
            .http
            .clone()
            .map(|http| IngressServer::new(http, ingress, cancel_token.child_token()));

        let runner = Arc::new(WindowJobRunner::new(escalation, queue.clone(), listeners));
        let scheduler = WindowScheduler::new(config.timezone()?, runner.clone(), &cancel_token);

        Ok(Self {
            config,
            cancel_token,
            queue,
            runner,
            scheduler,
            server,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn queue(&self) -> &AlertQueue {
        &self.queue
    }

    /// Schedule every window job and run until cancelled, then shut down.
    pub async fn run(&self) -> Result<()> {
        let jobs = self
            .scheduler
            .schedule_all(&self.config.start, &self.config.stop)?;
        info!(
            listeners = self.runner.listeners().len(),
            jobs = jobs.len(),
            "Notificator started"
        );

        let served = match &self.server {
            Some(server) => server.run().await,
            None => {
                self.cancel_token.cancelled().await;
                Ok(())
            }
        };
        if let Err(e) = &served {
            error!(error = %e, "Webhook server failed");
        }

        self.shutdown_with_timeout(jobs, self.config.shutdown_timeout())
            .await;
        served
    }

    /// Stop scheduling, close listeners and drain the queue within `timeout`.
    pub async fn shutdown_with_timeout(&self, jobs: Vec<JobHandle>, timeout: Duration) {
        info!(?timeout, "Shutting down");
        let deadline = Instant::now() + timeout;

        self.cancel_token.cancel();
        self.scheduler.shutdown();

        if let Err(e) = self.runner.close_window().await {
            warn!(error = %e, "Some listeners did not close cleanly");
        }

        let (drained, stopped) = settle(
            &self.queue,
            join_all(jobs.into_iter().map(JobHandle::join)),
            deadline,
        )
        .await;

        if !drained || !stopped {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        let stats = self.queue.stats();
        info!(
            batches = stats.batches,
            alerts = stats.alerts_dispatched,
            dropped = stats.alerts_dropped,
            "Notificator stopped"
        );
    }
}

/// Drain the queue, then wait for `jobs`, both bounded by one `deadline`.
///
/// Returns whether the queue drained and whether the jobs finished.
async fn settle<F: Future>(queue: &AlertQueue, jobs: F, deadline: Instant) -> (bool, bool) {
    let drained = queue
        .drain(deadline.saturating_duration_since(Instant::now()))
        .await;
    let stopped = tokio::time::timeout_at(deadline, jobs).await.is_ok();
    (drained, stopped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Alert;
    use crate::escalation::EscalationOptions;
    use crate::listener::{WebhookListener, WebhookListenerConfig};
    use crate::queue::AlertQueueConfig;
    use crate::server::WebhookFields;
    use crate::test_helpers::{BlockingListener, RecordingNotifier, ScriptedTransport, registry};

    fn start(runner: &Arc<WindowJobRunner>, index: usize) -> tokio::task::JoinHandle<Result<()>> {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run(WindowJob::Start { index }, CancellationToken::new())
                .await
        })
    }

    async fn until(condition: impl Fn() -> bool) {
        while !condition() {
            tokio::task::yield_now().await;
        }
    }

    fn runner(
        transport: Arc<ScriptedTransport>,
        listeners: Vec<Arc<dyn Listener>>,
        recorder: Arc<RecordingNotifier>,
    ) -> (Arc<WindowJobRunner>, AlertQueue) {
        let escalation = Arc::new(EscalationManager::new(
            Arc::new(registry()),
            transport,
            EscalationOptions::default(),
        ));
        let queue = AlertQueue::new(
            AlertQueueConfig {
                group_wait: Duration::from_secs(2),
                ..Default::default()
            },
            vec![recorder],
        );
        (
            Arc::new(WindowJobRunner::new(escalation, queue.clone(), listeners)),
            queue,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_responder_is_bound_before_listeners_start() {
        let recorder = Arc::new(RecordingNotifier::new("rec"));
        let listener = Arc::new(BlockingListener::new("emitter"));
        let (runner, queue) = runner(
            Arc::new(ScriptedTransport::answering(["+2"])),
            vec![listener.clone()],
            recorder.clone(),
        );
        listener.emit_on_start(queue.clone(), Alert::new("telegram", "ops", "disk full"));

        let start = {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner
                    .run(WindowJob::Start { index: 0 }, CancellationToken::new())
                    .await
            })
        };
        let calls = recorder.wait_for_calls(1).await;
        assert_eq!(calls[0].responder.name, "Bob");

        runner.run(WindowJob::Stop { index: 0 }, CancellationToken::new()).await.unwrap();
        start.await.unwrap().unwrap();
        assert_eq!(listener.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_escalation_failure_skips_listeners() {
        let recorder = Arc::new(RecordingNotifier::new("rec"));
        let listener = Arc::new(BlockingListener::new("idle"));
        let (runner, _) = runner(
            Arc::new(ScriptedTransport::failing()),
            vec![listener.clone()],
            recorder,
        );

        let result = runner
            .run(WindowJob::Start { index: 0 }, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::Escalation(_))));
        assert_eq!(listener.listen_calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_closes_every_listener_despite_errors() {
        let recorder = Arc::new(RecordingNotifier::new("rec"));
        let broken = Arc::new(BlockingListener::new("broken").failing_close());
        let healthy = Arc::new(BlockingListener::new("healthy"));
        let (runner, _) = runner(
            Arc::new(ScriptedTransport::answering(["+1"])),
            vec![broken.clone(), healthy.clone()],
            recorder,
        );

        let err = runner.close_window().await.unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert_eq!(broken.close_calls(), 1);
        assert_eq!(healthy.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_during_escalation_cancels_window() {
        let recorder = Arc::new(RecordingNotifier::new("rec"));
        let transport = Arc::new(ScriptedTransport::silent());
        let listener = Arc::new(BlockingListener::new("idle"));
        let (runner, queue) = runner(transport.clone(), vec![listener.clone()], recorder);

        let window = start(&runner, 0);
        until(|| transport.rounds() == 1).await;

        runner
            .run(WindowJob::Stop { index: 0 }, CancellationToken::new())
            .await
            .unwrap();
        window.await.unwrap().unwrap();

        let late = transport.last_reply().unwrap();
        assert!(!late.send("+1").await);
        assert!(transport.last_round().unwrap().is_cancelled());
        assert_eq!(listener.listen_calls(), 0);
        assert!(queue.bound_responder().is_none());
    }

    #[tokio::test]
    async fn test_overlapping_windows_keep_webhook_endpoint() {
        let recorder = Arc::new(RecordingNotifier::new("rec"));
        let transport = Arc::new(ScriptedTransport::answering(["+1"]));
        let ingress = IngressRegistry::new();
        let queue = AlertQueue::new(AlertQueueConfig::default(), vec![recorder]);
        let webhook = Arc::new(WebhookListener::new(
            WebhookListenerConfig {
                name: "grafana".to_string(),
                token: "secret".to_string(),
                fields: WebhookFields::default(),
            },
            queue.clone(),
            ingress.clone(),
        ));
        let escalation = Arc::new(EscalationManager::new(
            Arc::new(registry()),
            transport.clone(),
            EscalationOptions::default(),
        ));
        let runner = Arc::new(WindowJobRunner::new(
            escalation,
            queue.clone(),
            vec![webhook as Arc<dyn Listener>],
        ));

        let first = start(&runner, 0);
        until(|| ingress.get("grafana").is_some()).await;

        transport.script(["+2"]);
        let second = start(&runner, 1);
        until(|| first.is_finished()).await;
        first.await.unwrap().unwrap();

        assert!(ingress.get("grafana").is_some());
        assert!(!second.is_finished());
        assert_eq!(queue.bound_responder().unwrap().name, "Bob");

        runner
            .run(WindowJob::Stop { index: 0 }, CancellationToken::new())
            .await
            .unwrap();
        second.await.unwrap().unwrap();
        assert!(ingress.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_share_one_deadline() {
        let slow = Arc::new(RecordingNotifier::new("slow").with_delay(Duration::from_secs(60)));
        let queue = AlertQueue::new(AlertQueueConfig::default(), vec![slow]);
        queue.bind(crate::domain::Responder::new("Bob", "+2"));
        queue.push(Alert::new("telegram", "ops", "disk full")).unwrap();

        let begun = Instant::now();
        let (drained, stopped) = settle(
            &queue,
            std::future::pending::<()>(),
            begun + Duration::from_secs(5),
        )
        .await;

        assert!(!drained);
        assert!(!stopped);
        assert!(begun.elapsed() < Duration::from_secs(6));
    }
}
