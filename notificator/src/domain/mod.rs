//! Core domain types shared by the scheduler, queue and escalation.

mod alert;
mod responder;
mod retry_policy;

pub use alert::Alert;
pub use responder::{Choice, Responder, ResponderRegistry};
pub use retry_policy::RetryPolicy;
