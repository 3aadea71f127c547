mod error;
mod message;
mod queue;
mod task;

pub use error::{QueueError, Result};
pub use message::{DeliveryTag, Message};
pub use queue::QueueSpec;
pub use task::{KwArgs, TaskCall};

/// Default port of the RabbitMQ management interface.
pub const MANAGEMENT_PORT: u16 = 15672;
