//! notificator library crate.
//!
//! An on-call alert router. Recurring start/stop expressions open and close
//! activation windows. Each window begins with an escalation round that picks
//! the on-duty responder; listeners then push alerts into a debounced queue
//! which fans grouped batches out to every notifier.

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod escalation;
pub mod listener;
pub mod logging;
pub mod notifier;
pub mod queue;
pub mod scheduler;
pub mod server;
pub mod telegram;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{Error, Result};
