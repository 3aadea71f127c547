use crate::config::{FetchConfig, PollConfig};
use crate::error::{Result, WorkerError};
use crate::handler::TaskParser;
use crate::poller::{fetch_msgs, PollingIterator};
use crate::signals::{self, SignalGuard};
use queue_worker_broker::{Connector, MessageCounter};
use queue_worker_core::TaskCall;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Cooperative stop check, consulted before every fetch.
pub trait ShouldStop {
    fn should_stop(&self) -> bool;
}

impl ShouldStop for SignalGuard {
    fn should_stop(&self) -> bool {
        self.stop_requested()
    }
}

/// Shareable stop flag for driving the loop without signals.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl ShouldStop for StopFlag {
    fn should_stop(&self) -> bool {
        self.is_set()
    }
}

/// Outcome of a completed loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollSummary {
    /// Tasks run to completion and acknowledged.
    pub executed: usize,
    /// The loop ended on a stop request rather than an empty queue.
    pub stopped_early: bool,
}

/// Fetch, decode, build, run and acknowledge tasks one at a time.
pub struct TaskExecutionLoop<'a, P: TaskParser + ?Sized, S: ShouldStop + ?Sized> {
    parser: &'a P,
    stop: &'a S,
}

impl<'a, P: TaskParser + ?Sized, S: ShouldStop + ?Sized> TaskExecutionLoop<'a, P, S> {
    pub fn new(parser: &'a P, stop: &'a S) -> Self {
        TaskExecutionLoop { parser, stop }
    }

    /// Drive `messages` until it ends, a stop is requested, or a task fails.
    /// The iterator is closed on every path.
    pub fn run<K, M>(&self, messages: &mut PollingIterator<K, M>) -> Result<PollSummary>
    where
        K: Connector,
        M: MessageCounter,
    {
        let outcome = self.drive(messages);
        let closed = messages.close();

        match (outcome, closed) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "fetch thread also failed while closing");
                Err(e)
            }
        }
    }

    fn drive<K, M>(&self, messages: &mut PollingIterator<K, M>) -> Result<PollSummary>
    where
        K: Connector,
        M: MessageCounter,
    {
        let mut summary = PollSummary::default();

        loop {
            if self.stop.should_stop() {
                info!(executed = summary.executed, "stop requested, not starting another task");
                summary.stopped_early = true;
                return Ok(summary);
            }

            let msg = match messages.next() {
                Some(msg) => msg?,
                None => {
                    summary.stopped_early = self.stop.should_stop();
                    debug!(executed = summary.executed, "no more messages");
                    return Ok(summary);
                }
            };

            let call = TaskCall::decode(msg.payload()).map_err(WorkerError::Decode)?;
            let task = self.parser.parse(call).map_err(WorkerError::Parse)?;

            let start = Instant::now();
            task().map_err(WorkerError::Task)?;
            let elapsed = start.elapsed();

            messages.ack(&msg)?;
            summary.executed += 1;
            info!(
                delivery_tag = msg.delivery_tag(),
                "Task successfully executed in {:.2}s",
                elapsed.as_secs_f64()
            );
        }
    }
}

/// Consume `queue` and run every task it holds.
///
/// SIGINT handlers are installed for the duration of the call: the first
/// SIGINT lets the current task finish and then returns, a second one exits
/// the process. SIGTERM exits the process immediately.
pub fn poll<K, M, P>(
    connector: Arc<K>,
    counter: M,
    queue: &str,
    parser: &P,
    config: PollConfig,
    fetch: FetchConfig,
) -> Result<PollSummary>
where
    K: Connector,
    M: MessageCounter,
    P: TaskParser + ?Sized,
{
    config.validate()?;
    let guard = SignalGuard::install()?;

    let mut messages = fetch_msgs(connector, counter, queue, config)
        .with_fetch_config(fetch)
        .with_interrupt(signals::stop_requested);

    info!(queue, "polling for tasks");
    TaskExecutionLoop::new(parser, &guard).run(&mut messages)
}
