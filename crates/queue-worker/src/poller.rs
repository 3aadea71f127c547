//! Caller-side polling iterator.
//!
//! The iterator never touches the broker connection. It polls the fetch
//! slot, backs off while nothing arrives, and asks the management interface
//! how much work is left to decide when to give up.

use crate::backoff::{Observation, PollCursor};
use crate::channels::{self, ChannelError, ConsumerEnds};
use crate::config::{FetchConfig, PollConfig};
use crate::error::{Result, WorkerError};
use crate::fetcher;
use queue_worker_broker::{Connector, MessageCounter};
use queue_worker_core::Message;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

struct WorkerHandle {
    ends: ConsumerEnds,
    thread: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    fn join(self) -> Result<()> {
        let WorkerHandle { ends, thread } = self;
        ends.request_shutdown();
        // Dropping our ends lets a thread blocked in `idle` see the shutdown.
        drop(ends);
        thread.join().map_err(|_| WorkerError::ThreadPanicked)?
    }
}

/// Lazily consumes `queue`, yielding messages until the retry budget is spent.
///
/// Every yielded message must be acknowledged with [`PollingIterator::ack`]
/// before the next one is fetched; until then the background thread holds it.
pub struct PollingIterator<K: Connector, M: MessageCounter> {
    connector: Arc<K>,
    counter: M,
    queue: String,
    config: PollConfig,
    fetch: FetchConfig,
    cursor: PollCursor,
    worker: Option<WorkerHandle>,
    interrupt: Option<Box<dyn Fn() -> bool>>,
    finished: bool,
}

/// Longest uninterrupted sleep while an interrupt check is set.
const PAUSE_SLICE: Duration = Duration::from_millis(100);

impl<K: Connector, M: MessageCounter> PollingIterator<K, M> {
    pub fn new(connector: Arc<K>, counter: M, queue: impl Into<String>, config: PollConfig) -> Self {
        let cursor = PollCursor::from_config(&config);
        PollingIterator {
            connector,
            counter,
            queue: queue.into(),
            config,
            fetch: FetchConfig::default(),
            cursor,
            worker: None,
            interrupt: None,
            finished: false,
        }
    }

    pub fn with_fetch_config(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// Stop waiting for messages as soon as `interrupted` returns true. The
    /// check runs between backoff rounds and during backoff sleeps.
    pub fn with_interrupt<F: Fn() -> bool + 'static>(mut self, interrupted: F) -> Self {
        self.interrupt = Some(Box::new(interrupted));
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_closed(&self) -> bool {
        self.finished
    }

    /// Ask the background thread to acknowledge `msg`.
    ///
    /// If the thread has died since the message was handed out, it is
    /// reaped and the error that ended it is returned.
    pub fn ack(&mut self, msg: &Message) -> Result<()> {
        let worker = self.worker.as_ref().ok_or(WorkerError::Closed)?;
        match worker.ends.request_ack(msg.delivery_tag()) {
            Ok(()) => Ok(()),
            Err(ChannelError::Disconnected) => match self.reap() {
                Some(Err(e)) => Err(e),
                _ => Err(ChannelError::Disconnected.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Acknowledgement callback borrowing this iterator.
    pub fn acker(&mut self) -> impl FnMut(&Message) -> Result<()> + '_ {
        move |msg| self.ack(msg)
    }

    /// Stop the background thread and wait for it. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        self.finished = true;
        match self.worker.take() {
            Some(worker) => {
                debug!(queue = %self.queue, "closing polling iterator");
                worker.join()
            }
            None => Ok(()),
        }
    }

    fn ensure_worker(&mut self) -> Result<&ConsumerEnds> {
        if self.worker.is_none() {
            let (owner, consumer) = channels::pair();
            let connector = Arc::clone(&self.connector);
            let queue = self.queue.clone();
            let fetch = self.fetch.clone();
            let verbose = self.config.verbose;

            let thread = thread::Builder::new()
                .name(format!("fetch-{}", self.queue))
                .spawn(move || fetcher::run(connector, queue, owner, fetch, verbose))?;

            debug!(queue = %self.queue, "fetch thread spawned");
            self.worker = Some(WorkerHandle { ends: consumer, thread });
        }

        self.worker.as_ref().map(|w| &w.ends).ok_or(WorkerError::Closed)
    }

    /// Thread is gone: reap it and surface whatever ended it.
    fn reap(&mut self) -> Option<Result<Message>> {
        self.finished = true;
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(()) => None,
            Err(e) => Some(Err(e)),
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(|check| check())
    }

    /// Sleep for `delay`, returning early (and `false`) on interrupt.
    fn pause(&self, delay: Duration) -> bool {
        if self.interrupt.is_none() {
            thread::sleep(delay);
            return true;
        }

        let deadline = Instant::now() + delay;
        loop {
            if self.interrupted() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }

    fn observe_remaining(&mut self) -> bool {
        let observation = match self.counter.message_count(&self.queue) {
            Ok(0) => Observation::Empty,
            Ok(n) => {
                if self.config.verbose {
                    info!(queue = %self.queue, remaining = n, "messages remaining in queue");
                } else {
                    debug!(queue = %self.queue, remaining = n, "messages remaining in queue");
                }
                Observation::Remaining(n)
            }
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "could not query queue size");
                Observation::Unavailable
            }
        };
        self.cursor.observe(observation)
    }
}

impl<K: Connector, M: MessageCounter> Iterator for PollingIterator<K, M> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let ends = match self.ensure_worker() {
                Ok(ends) => ends,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };

            match ends.try_next() {
                Ok(Some(msg)) => {
                    self.cursor.record_delivery();
                    if self.config.verbose {
                        info!(delivery_tag = msg.delivery_tag(), "message received: {}", msg.payload());
                    }
                    return Some(Ok(msg));
                }
                Ok(None) => {}
                Err(ChannelError::Disconnected) => return self.reap(),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }

            if !self.observe_remaining() {
                info!(
                    queue = %self.queue,
                    failures = self.cursor.failures(),
                    "queue observed empty, stopping"
                );
                if let Err(e) = self.close() {
                    return Some(Err(e));
                }
                return None;
            }

            let delay = self.cursor.advance();
            if !self.pause(delay) {
                info!(queue = %self.queue, "interrupted while waiting for messages");
                if let Err(e) = self.close() {
                    return Some(Err(e));
                }
                return None;
            }
        }
    }
}

impl<K: Connector, M: MessageCounter> Drop for PollingIterator<K, M> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(queue = %self.queue, error = %e, "fetch thread ended with an error");
        }
    }
}

/// Poll `queue` until it has been observed empty more than
/// `config.max_num_retries` times.
pub fn fetch_msgs<K, M>(connector: Arc<K>, counter: M, queue: &str, config: PollConfig) -> PollingIterator<K, M>
where
    K: Connector,
    M: MessageCounter,
{
    PollingIterator::new(connector, counter, queue, config)
}
