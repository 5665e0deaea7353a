//! Activation window scheduling.
//!
//! Start expressions open an activation window, stop expressions close it.
//! Every firing is a [`WindowJob`] handed to a [`JobRunner`].

mod expression;
mod window;

pub use expression::ScheduleExpression;
pub use window::{JobHandle, WindowScheduler};

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// A scheduled job, indexed by its position in the `start`/`stop` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowJob {
    Start { index: usize },
    Stop { index: usize },
}

impl WindowJob {
    /// Log tag, e.g. `start-0`.
    pub fn tag(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WindowJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { index } => write!(f, "start-{index}"),
            Self::Stop { index } => write!(f, "stop-{index}"),
        }
    }
}

/// Executes window jobs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run one firing of `job`. `cancel` fires on shutdown.
    async fn run(&self, job: WindowJob, cancel: CancellationToken) -> Result<()>;
}
