//! Alert ingestion and batched delivery.

mod alert_queue;

pub use alert_queue::{
    AlertQueue, AlertQueueConfig, DEFAULT_GROUP_WAIT, DispatchPolicy, PushOutcome, QueueStats,
};
