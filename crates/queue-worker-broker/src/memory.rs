//! In-process broker with AMQP-like delivery semantics.
//!
//! Deliveries stay owned by the broker until acknowledged. Closing (or
//! dropping) a connection returns its unacknowledged deliveries to the front
//! of the queue, so they are redelivered. Faults can be injected to exercise
//! the worker's failure paths.

use crate::connection::{Connector, MessageCounter, QueueConnection};
use parking_lot::Mutex;
use queue_worker_core::{DeliveryTag, Message, QueueError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<String>,
    unacked: HashMap<DeliveryTag, (Uuid, String)>,
    acked: Vec<DeliveryTag>,
}

#[derive(Default)]
struct Faults {
    size_query_failures: u32,
    connect_failures: u32,
    severed: bool,
    pending_events: u32,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    next_tag: DeliveryTag,
    faults: Faults,
    heartbeats: u64,
    open_connections: HashSet<Uuid>,
    touched_by: HashMap<Uuid, HashSet<ThreadId>>,
}

impl BrokerState {
    fn queue(&mut self, name: &str) -> &mut QueueState {
        self.queues.entry(name.to_string()).or_default()
    }

    fn touch(&mut self, connection: Uuid) {
        self.touched_by
            .entry(connection)
            .or_default()
            .insert(thread::current().id());
    }

    fn check_link(&self) -> Result<()> {
        if self.faults.severed {
            return Err(QueueError::ConnectionLost("broker link severed".to_string()));
        }
        Ok(())
    }
}

/// Shared handle to an in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue payloads directly, bypassing any connection.
    pub fn seed<I, S>(&self, queue: &str, payloads: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        let q = state.queue(queue);
        q.ready.extend(payloads.into_iter().map(Into::into));
    }

    /// Messages waiting to be delivered.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet acknowledged.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| q.unacked.len())
    }

    /// Delivery tags acknowledged so far, in acknowledgement order.
    pub fn acked_tags(&self, queue: &str) -> Vec<DeliveryTag> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.acked.clone())
            .unwrap_or_default()
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.state.lock().heartbeats
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections.len()
    }

    /// Largest number of distinct threads that issued operations on any
    /// single connection.
    pub fn max_threads_per_connection(&self) -> usize {
        self.state
            .lock()
            .touched_by
            .values()
            .map(HashSet::len)
            .max()
            .unwrap_or(0)
    }

    /// Make the next `n` size queries fail.
    pub fn fail_size_queries(&self, n: u32) {
        self.state.lock().faults.size_query_failures = n;
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_connects(&self, n: u32) {
        self.state.lock().faults.connect_failures = n;
    }

    /// Make the next `n` event drains return an event immediately instead
    /// of timing out.
    pub fn push_events(&self, n: u32) {
        self.state.lock().faults.pending_events = n;
    }

    /// Break (or restore) every connection's link to the broker. While
    /// severed, all data-plane operations fail with `ConnectionLost`.
    pub fn sever(&self, severed: bool) {
        self.state.lock().faults.severed = severed;
    }
}

impl Connector for MemoryBroker {
    type Connection = MemoryConnection;

    fn connect(&self, queue: &str) -> Result<MemoryConnection> {
        let mut state = self.state.lock();
        if state.faults.connect_failures > 0 {
            state.faults.connect_failures -= 1;
            return Err(QueueError::ConnectionLost("connection refused".to_string()));
        }

        let id = Uuid::new_v4();
        state.open_connections.insert(id);
        state.queue(queue);
        debug!(connection = %id, queue, "memory connection opened");

        Ok(MemoryConnection {
            broker: self.clone(),
            queue: queue.to_string(),
            id,
            closed: false,
        })
    }
}

impl MessageCounter for MemoryBroker {
    fn message_count(&self, queue: &str) -> Result<u64> {
        let mut state = self.state.lock();
        if state.faults.size_query_failures > 0 {
            state.faults.size_query_failures -= 1;
            return Err(QueueError::SizeQuery {
                queue: queue.to_string(),
                reason: "management interface unavailable".to_string(),
            });
        }

        Ok(state
            .queues
            .get(queue)
            .map_or(0, |q| (q.ready.len() + q.unacked.len()) as u64))
    }
}

/// Connection to one queue of a [`MemoryBroker`].
pub struct MemoryConnection {
    broker: MemoryBroker,
    queue: String,
    id: Uuid,
    closed: bool,
}

impl MemoryConnection {
    fn with_state<T>(&mut self, op: impl FnOnce(&mut BrokerState, &str, Uuid) -> Result<T>) -> Result<T> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        let mut state = self.broker.state.lock();
        state.touch(self.id);
        op(&mut state, &self.queue, self.id)
    }
}

impl QueueConnection for MemoryConnection {
    fn get_nowait(&mut self) -> Result<Message> {
        self.with_state(|state, queue, id| {
            state.check_link()?;
            let payload = state.queue(queue).ready.pop_front().ok_or(QueueError::Empty)?;

            state.next_tag += 1;
            let tag = state.next_tag;
            state.queue(queue).unacked.insert(tag, (id, payload.clone()));

            Ok(Message::new(payload, tag))
        })
    }

    fn put(&mut self, payload: &str) -> Result<()> {
        self.with_state(|state, queue, _| {
            state.check_link()?;
            state.queue(queue).ready.push_back(payload.to_string());
            Ok(())
        })
    }

    fn ack(&mut self, message: &Message) -> Result<()> {
        let tag = message.delivery_tag();
        self.with_state(|state, queue, _| {
            state.check_link()?;
            let q = state.queue(queue);
            q.unacked.remove(&tag).ok_or(QueueError::UnknownDelivery(tag))?;
            q.acked.push(tag);
            Ok(())
        })
    }

    fn heartbeat_check(&mut self) -> Result<()> {
        self.with_state(|state, _, _| {
            state.check_link()?;
            state.heartbeats += 1;
            Ok(())
        })
    }

    fn drain_events(&mut self, timeout: Duration) -> Result<()> {
        let delivered = self.with_state(|state, _, _| {
            state.check_link()?;
            if state.faults.pending_events > 0 {
                state.faults.pending_events -= 1;
                return Ok(true);
            }
            Ok(false)
        })?;
        if delivered {
            return Ok(());
        }

        thread::sleep(timeout);
        Err(QueueError::Timeout)
    }

    fn purge(&mut self) -> Result<u64> {
        self.with_state(|state, queue, _| {
            let q = state.queue(queue);
            let removed = q.ready.len() as u64;
            q.ready.clear();
            Ok(removed)
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut state = self.broker.state.lock();
        state.open_connections.remove(&self.id);

        let id = self.id;
        let q = state.queue(&self.queue);
        let mut returned: Vec<(DeliveryTag, String)> = q
            .unacked
            .iter()
            .filter(|(_, (owner, _))| *owner == id)
            .map(|(tag, (_, payload))| (*tag, payload.clone()))
            .collect();
        returned.sort_by_key(|(tag, _)| *tag);

        for (tag, _) in &returned {
            q.unacked.remove(tag);
        }
        for (_, payload) in returned.into_iter().rev() {
            q.ready.push_front(payload);
        }

        debug!(connection = %id, "memory connection closed");
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q: &str = "testqueue";

    #[test]
    fn test_get_ack_cycle() {
        let broker = MemoryBroker::new();
        broker.seed(Q, ["a", "b"]);

        let mut conn = broker.connect(Q).unwrap();
        let msg = conn.get_nowait().unwrap();
        assert_eq!(msg.payload(), "a");
        assert_eq!(broker.ready_count(Q), 1);
        assert_eq!(broker.unacked_count(Q), 1);
        assert_eq!(broker.message_count(Q).unwrap(), 2);

        conn.ack(&msg).unwrap();
        assert_eq!(broker.unacked_count(Q), 0);
        assert_eq!(broker.acked_tags(Q), vec![msg.delivery_tag()]);
    }

    #[test]
    fn test_get_nowait_empty() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect(Q).unwrap();
        assert!(matches!(conn.get_nowait(), Err(QueueError::Empty)));
    }

    #[test]
    fn test_double_ack_rejected() {
        let broker = MemoryBroker::new();
        broker.seed(Q, ["a"]);
        let mut conn = broker.connect(Q).unwrap();
        let msg = conn.get_nowait().unwrap();
        conn.ack(&msg).unwrap();
        assert!(matches!(conn.ack(&msg), Err(QueueError::UnknownDelivery(_))));
    }

    #[test]
    fn test_close_requeues_unacked_in_order() {
        let broker = MemoryBroker::new();
        broker.seed(Q, ["a", "b", "c"]);

        let mut conn = broker.connect(Q).unwrap();
        conn.get_nowait().unwrap();
        conn.get_nowait().unwrap();
        drop(conn);

        assert_eq!(broker.ready_count(Q), 3);
        assert_eq!(broker.unacked_count(Q), 0);
        assert_eq!(broker.open_connections(), 0);

        let mut conn = broker.connect(Q).unwrap();
        assert_eq!(conn.get_nowait().unwrap().payload(), "a");
        assert_eq!(conn.get_nowait().unwrap().payload(), "b");
    }

    #[test]
    fn test_purge_is_idempotent() {
        let broker = MemoryBroker::new();
        broker.seed(Q, ["a", "b"]);
        let mut conn = broker.connect(Q).unwrap();
        assert_eq!(conn.purge().unwrap(), 2);
        assert_eq!(conn.purge().unwrap(), 0);
        assert_eq!(broker.message_count(Q).unwrap(), 0);
    }

    #[test]
    fn test_injected_size_query_failures() {
        let broker = MemoryBroker::new();
        broker.fail_size_queries(2);
        assert!(broker.message_count(Q).is_err());
        assert!(broker.message_count(Q).is_err());
        assert_eq!(broker.message_count(Q).unwrap(), 0);
    }

    #[test]
    fn test_severed_link() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect(Q).unwrap();
        broker.sever(true);
        assert!(matches!(conn.heartbeat_check(), Err(QueueError::ConnectionLost(_))));
        assert!(matches!(
            conn.drain_events(Duration::from_millis(1)),
            Err(QueueError::ConnectionLost(_))
        ));
        broker.sever(false);
        conn.heartbeat_check().unwrap();
        assert_eq!(broker.heartbeat_count(), 1);
    }

    #[test]
    fn test_drain_times_out() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect(Q).unwrap();
        assert!(matches!(
            conn.drain_events(Duration::from_millis(1)),
            Err(QueueError::Timeout)
        ));
    }

    #[test]
    fn test_pushed_events_drain_immediately() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect(Q).unwrap();
        broker.push_events(1);
        assert!(conn.drain_events(Duration::from_secs(5)).is_ok());
        assert!(matches!(
            conn.drain_events(Duration::from_millis(1)),
            Err(QueueError::Timeout)
        ));
        assert_eq!(broker.heartbeat_count(), 0);
    }

    #[test]
    fn test_closed_connection_rejects_operations() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect(Q).unwrap();
        conn.close().unwrap();
        assert!(matches!(conn.get_nowait(), Err(QueueError::Closed)));
    }

    #[test]
    fn test_connect_failures() {
        let broker = MemoryBroker::new();
        broker.fail_connects(1);
        assert!(broker.connect(Q).is_err());
        assert!(broker.connect(Q).is_ok());
    }
}
