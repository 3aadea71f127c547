//! Queue Worker
//!
//! Consumes a remote message queue through a single background thread that
//! owns the broker connection.
//!
//! # Features
//! - Background fetch thread with a FETCH/WAIT state machine and heartbeats
//! - Lazy polling iterator with exponential backoff and a retry budget
//! - Synchronous task execution with acknowledgement after completion
//! - Two-stage SIGINT shutdown; SIGTERM exits immediately
//! - Prior signal handlers restored on every exit path

pub mod backoff;
pub mod channels;
pub mod config;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod handler;
pub mod logging;
pub mod poller;
pub mod signals;

pub use backoff::PollCursor;
pub use config::{FetchConfig, FlushPolicy, LoggingSettings, PollConfig, QueueSettings, WorkerConfig};
pub use error::WorkerError;
pub use executor::{poll, PollSummary, StopFlag, ShouldStop, TaskExecutionLoop};
pub use fetcher::{FetchMachine, Step, ThreadState};
pub use handler::{ParserRegistry, TaskFn, TaskParser};
pub use poller::{fetch_msgs, PollingIterator};
pub use signals::SignalGuard;

pub use queue_worker_broker;
pub use queue_worker_core;
