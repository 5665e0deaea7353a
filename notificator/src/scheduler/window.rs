use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{JobRunner, ScheduleExpression, WindowJob};
use crate::Result;

/// A registered recurring job.
#[derive(Debug)]
pub struct JobHandle {
    pub job: WindowJob,
    pub expression: String,
    cancellation_token: CancellationToken,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Stop scheduling further firings. Firings already running are left to
    /// their own cancellation.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Wait for the scheduling loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(tag = %self.job, error = %e, "Schedule loop ended abnormally");
        }
    }
}

/// Fires [`WindowJob`]s on cron expressions evaluated in one timezone.
pub struct WindowScheduler {
    timezone: Tz,
    runner: Arc<dyn JobRunner>,
    cancel_token: CancellationToken,
}

impl WindowScheduler {
    pub fn new(timezone: Tz, runner: Arc<dyn JobRunner>, cancel_token: &CancellationToken) -> Self {
        Self {
            timezone,
            runner,
            cancel_token: cancel_token.child_token(),
        }
    }

    /// Register a recurring job.
    ///
    /// Fails if `expression` does not parse. Each firing runs in its own
    /// task, so a long-running job never delays the next firing of any job.
    pub fn schedule(&self, expression: &str, job: WindowJob) -> Result<JobHandle> {
        let expression = ScheduleExpression::parse(expression)?;
        let cancellation_token = self.cancel_token.child_token();

        let task = tokio::spawn(schedule_loop(
            expression.clone(),
            job,
            self.timezone,
            self.runner.clone(),
            cancellation_token.clone(),
        ));

        Ok(JobHandle {
            job,
            expression: expression.source().to_string(),
            cancellation_token,
            task,
        })
    }

    /// Register every start and stop expression.
    pub fn schedule_all(&self, start: &[String], stop: &[String]) -> Result<Vec<JobHandle>> {
        let start_jobs = start
            .iter()
            .enumerate()
            .map(|(index, e)| (e, WindowJob::Start { index }));
        let stop_jobs = stop
            .iter()
            .enumerate()
            .map(|(index, e)| (e, WindowJob::Stop { index }));

        let mut handles = Vec::with_capacity(start.len() + stop.len());
        for (expression, job) in start_jobs.chain(stop_jobs) {
            match self.schedule(expression, job) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in &handles {
                        handle.cancel();
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    /// Stop every scheduling loop and signal running firings.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

async fn schedule_loop(
    expression: ScheduleExpression,
    job: WindowJob,
    timezone: Tz,
    runner: Arc<dyn JobRunner>,
    cancel: CancellationToken,
) {
    let mut last_fired: Option<DateTime<Tz>> = None;

    loop {
        let now = Utc::now().with_timezone(&timezone);
        // A timer that wakes slightly early must not fire the same slot twice.
        let from = match &last_fired {
            Some(last) if *last > now => last.clone(),
            _ => now.clone(),
        };

        let Some(next) = expression.next_after(&from) else {
            warn!(tag = %job, expression = %expression, "No upcoming run, job disabled");
            return;
        };

        let wait = (next.clone() - now).to_std().unwrap_or(Duration::ZERO);
        info!(
            tag = %job,
            expression = %expression,
            interval = ?wait,
            next_run_at = %next,
            "Scheduled job"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                info!(tag = %job, "Schedule loop stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        last_fired = Some(next);
        info!(tag = %job, "Running job");

        let runner = runner.clone();
        let job_cancel = cancel.child_token();
        tokio::spawn(async move {
            match runner.run(job, job_cancel).await {
                Ok(()) => info!(tag = %job, "Job finished"),
                Err(e) => error!(tag = %job, error = %e, "Job failed"),
            }
        });
    }
}
