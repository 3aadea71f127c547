//! Broker collaborators for the queue worker.
//!
//! The worker never talks to a broker directly; it goes through the traits
//! in [`connection`]. This crate also ships an in-memory broker, the RabbitMQ
//! management size query and the helpers used to fill and purge queues.

pub mod connection;
pub mod management;
pub mod memory;
pub mod ops;
pub mod retry;

pub use connection::{Connector, MessageCounter, QueueConnection};
pub use management::ManagementApi;
pub use memory::{MemoryBroker, MemoryConnection};
pub use ops::{fetch_msg, insert_msgs, insert_tasks, purge_queue, submit_msg};
pub use retry::RetryPolicy;
