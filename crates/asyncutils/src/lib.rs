//! Async building blocks for the sync engine.
//!
//! - [`PriorityQueue`]: blocking, priority-ordered work queue with a single
//!   consumer in mind. FIFO within a priority level.
//! - [`Debouncer`]: keyed trailing-edge throttle. Bursts of values for the same
//!   key collapse into one callback once the key has been quiet for a window.

mod debounce;
mod queue;

pub use crate::debounce::Debouncer;
pub use crate::queue::{Priority, PriorityQueue};
pub use tokio_util::sync::CancellationToken;
