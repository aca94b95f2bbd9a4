//! Queue primitives for Conveyor
//!
//! Every queue implements [`JobQueue`]: push with an optional priority, pop
//! with an optional timeout, and the same [`QueueItem`] type for real work and
//! for the stop sentinel. The [`ResultStore`] is the shared task id to outcome
//! mapping that workers write into.

pub mod error;
pub mod fifo;
pub mod item;
pub mod journal;
pub mod priority;
pub mod queue;
pub mod store;
mod wait;

pub use error::{QueueError, QueueResult};
pub use fifo::FifoQueue;
pub use item::QueueItem;
pub use journal::JournaledQueue;
pub use priority::PriorityQueue;
pub use queue::{JobQueue, QueueKind, DEFAULT_PRIORITY, RETIRE_PRIORITY};
pub use store::{ResultDestination, ResultMapping, ResultStore};
