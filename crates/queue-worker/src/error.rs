use crate::channels::ChannelError;
use queue_worker_core::QueueError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Failed to decode task payload: {0}")]
    Decode(QueueError),

    #[error("Failed to build task: {0:#}")]
    Parse(anyhow::Error),

    #[error("Task failed: {0:#}")]
    Task(anyhow::Error),

    #[error("Fetch thread panicked")]
    ThreadPanicked,

    #[error("Polling iterator is closed")]
    Closed,

    #[error("Signal handling error: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error("Signal handlers are already installed")]
    SignalsInstalled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigLoad(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
