//! Delivery services.

pub mod retry_queue;
pub mod store;
pub mod sweeper;

pub use retry_queue::{QueueObserver, QueueStatus, RecordState, RetryQueue, RetryRecord};
pub use store::{DeliveryOutcome, MessageStore};
pub use sweeper::{spawn_sweep_loop, SweeperHandle};
