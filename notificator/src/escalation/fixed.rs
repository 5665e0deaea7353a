use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{EscalationTransport, SelectionReply};
use crate::domain::Choice;
use crate::{Error, Result};

/// Answers every round with the same responder.
pub struct FixedEscalation {
    phone: String,
}

impl FixedEscalation {
    pub fn new(phone: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
        }
    }
}

#[async_trait]
impl EscalationTransport for FixedEscalation {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn present(
        &self,
        choices: Vec<Choice>,
        reply: SelectionReply,
        _round: CancellationToken,
    ) -> Result<()> {
        if !choices.iter().any(|c| c.id == self.phone) {
            return Err(Error::escalation(format!(
                "fixed responder '{}' is not in the registry",
                self.phone
            )));
        }

        info!(phone = %self.phone, "Selecting fixed on-duty responder");
        reply.send(self.phone.clone()).await;
        Ok(())
    }
}
