//! Log sink: writes each batch as a structured log line.

use async_trait::async_trait;
use tracing::info;

use super::{Notifier, NotifyError};
use crate::domain::{Alert, Responder};

pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, responder: &Responder, alerts: &[Alert]) -> Result<(), NotifyError> {
        let rendered: Vec<String> = alerts.iter().map(ToString::to_string).collect();
        info!(
            notifier = %self.name,
            on_duty = %responder,
            count = alerts.len(),
            alerts = ?rendered,
            "Received alerts"
        );
        Ok(())
    }
}
