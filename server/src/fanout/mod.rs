//! Per subscriber delivery.
//!
//! Every subscriber owns one [`FanoutQueue`] that any number of ingest paths enqueue into and
//! exactly one [`FanoutWorker`] that drains it onto the subscriber's connection.  The queue's
//! [`DiscardPolicy`] is what keeps a slow subscriber from holding up the publisher or anyone
//! else.

mod policy;
mod queue;
mod worker;

pub use self::policy::{DiscardPolicy, DiscardThresholds, Outstanding};
pub use self::queue::{channel, FanoutQueue, FanoutReceiver, QueueCounters};
pub use self::worker::{subscriber_chunk_stream_id, FanoutError, FanoutWorker};
