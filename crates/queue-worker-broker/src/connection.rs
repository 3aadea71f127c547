use queue_worker_core::{Message, Result};
use std::time::Duration;

/// A data-plane connection bound to one queue.
///
/// Implementations do not need to be thread-safe: the worker creates the
/// connection on its background thread and never lets it leave that thread.
pub trait QueueConnection {
    /// Dequeue without blocking. Returns [`QueueError::Empty`] when there is
    /// nothing to hand out.
    ///
    /// [`QueueError::Empty`]: queue_worker_core::QueueError::Empty
    fn get_nowait(&mut self) -> Result<Message>;

    fn put(&mut self, payload: &str) -> Result<()>;

    fn ack(&mut self, message: &Message) -> Result<()>;

    /// Connection-level liveness check; sends a heartbeat if one is due.
    fn heartbeat_check(&mut self) -> Result<()>;

    /// Process pending connection events, waiting at most `timeout`.
    /// Returns [`QueueError::Timeout`] when nothing arrived in time.
    ///
    /// [`QueueError::Timeout`]: queue_worker_core::QueueError::Timeout
    fn drain_events(&mut self, timeout: Duration) -> Result<()>;

    /// Drop every ready message; returns how many were removed.
    fn purge(&mut self) -> Result<u64>;

    fn close(&mut self) -> Result<()>;
}

/// Opens connections. Moved to the worker thread, which calls `connect` there.
pub trait Connector: Send + Sync + 'static {
    type Connection: QueueConnection;

    fn connect(&self, queue: &str) -> Result<Self::Connection>;
}

/// Administrative size query, independent of any data-plane connection.
///
/// Counts ready plus unacknowledged messages. Failures are expected to be
/// transient and are handled by the caller.
pub trait MessageCounter: Send + Sync {
    fn message_count(&self, queue: &str) -> Result<u64>;
}

impl<T: MessageCounter + ?Sized> MessageCounter for std::sync::Arc<T> {
    fn message_count(&self, queue: &str) -> Result<u64> {
        (**self).message_count(queue)
    }
}
