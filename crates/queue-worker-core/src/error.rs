use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    /// The remote queue had nothing to hand out. Not a failure.
    #[error("Queue is empty")]
    Empty,

    /// A bounded wait on the connection elapsed without an event.
    #[error("Timed out waiting for connection events")]
    Timeout,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Unknown delivery tag: {0}")]
    UnknownDelivery(u64),

    #[error("Cannot fetch information about {queue}: {reason}")]
    SizeQuery { queue: String, reason: String },

    #[error("Invalid queue url: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Mismatched task arguments: {args} positional vs {kwargs} keyword")]
    MismatchedArguments { args: usize, kwargs: usize },
}

pub type Result<T> = std::result::Result<T, QueueError>;
