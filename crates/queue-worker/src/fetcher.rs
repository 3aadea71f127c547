//! Background fetch thread.
//!
//! The thread is the only place a broker connection is ever used. It runs a
//! two-state machine: FETCH pulls the next message and hands it to the
//! caller, WAIT holds that message until the caller asks for it to be
//! acknowledged, keeping the connection alive in the meantime.

use crate::channels::OwnerEnds;
use crate::config::{FetchConfig, FlushPolicy};
use crate::error::Result;
use queue_worker_broker::{Connector, QueueConnection};
use queue_worker_core::{Message, QueueError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Fetch,
    Wait,
}

/// What the runner should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run the next transition right away.
    Continue,
    /// Sleep one `sleep_interval` first.
    Idle,
    /// Connection closed; the thread ends.
    Exit,
}

/// The FETCH/WAIT transition function.
///
/// Time is passed in rather than read, so the machine can be driven with a
/// synthetic clock.
pub struct FetchMachine {
    state: ThreadState,
    held: Option<Message>,
    last_heartbeat: Instant,
    config: FetchConfig,
    verbose: bool,
}

impl FetchMachine {
    pub fn new(config: FetchConfig, verbose: bool, now: Instant) -> Self {
        FetchMachine {
            state: ThreadState::Fetch,
            held: None,
            last_heartbeat: now,
            config,
            verbose,
        }
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn held(&self) -> Option<&Message> {
        self.held.as_ref()
    }

    /// Advance one transition.
    ///
    /// Errors other than an empty queue or a drain timeout are returned
    /// unchanged; they end the thread.
    pub fn step<C>(&mut self, conn: &mut C, ends: &OwnerEnds, now: Instant) -> Result<Step>
    where
        C: QueueConnection + ?Sized,
    {
        if ends.shutdown_requested() {
            self.shutdown(conn, ends);
            return Ok(Step::Exit);
        }

        match self.state {
            ThreadState::Fetch => self.fetch(conn, ends, now),
            ThreadState::Wait => self.wait(conn, ends, now),
        }
    }

    fn fetch<C>(&mut self, conn: &mut C, ends: &OwnerEnds, now: Instant) -> Result<Step>
    where
        C: QueueConnection + ?Sized,
    {
        let msg = match conn.get_nowait() {
            Ok(msg) => msg,
            Err(QueueError::Empty) => {
                conn.heartbeat_check()?;
                return Ok(Step::Idle);
            }
            Err(e) => return Err(e.into()),
        };

        if self.verbose {
            info!("Fetched a message from the queue: {}", msg.payload());
        } else {
            debug!(delivery_tag = msg.delivery_tag(), "message fetched");
        }

        let delivered = ends.deliver(msg.clone());
        self.held = Some(msg);
        self.last_heartbeat = now;
        self.state = ThreadState::Wait;

        match delivered {
            Ok(()) => Ok(Step::Continue),
            // Caller is gone; the shutdown check on the next step handles it.
            Err(crate::channels::ChannelError::Disconnected) => Ok(Step::Continue),
            Err(e) => Err(e.into()),
        }
    }

    fn wait<C>(&mut self, conn: &mut C, ends: &OwnerEnds, now: Instant) -> Result<Step>
    where
        C: QueueConnection + ?Sized,
    {
        if let Some(request) = ends.take_ack() {
            match self.held.take() {
                Some(held) if held.delivery_tag() == request.delivery_tag => {
                    conn.ack(&held)?;
                    debug!(delivery_tag = held.delivery_tag(), "message acknowledged");
                    self.last_heartbeat = now;
                    self.state = ThreadState::Fetch;
                }
                other => {
                    warn!(
                        requested = request.delivery_tag,
                        held = ?other.as_ref().map(Message::delivery_tag),
                        "ack request does not match the held message, ignoring"
                    );
                    self.held = other;
                }
            }
            return Ok(Step::Continue);
        }

        if now.saturating_duration_since(self.last_heartbeat) > self.config.heartbeat_interval {
            // Any event drained from the connection is an implicit heartbeat.
            match conn.drain_events(self.config.drain_timeout) {
                Ok(()) => {}
                Err(QueueError::Timeout) => conn.heartbeat_check()?,
                Err(e) => return Err(e.into()),
            }
            self.last_heartbeat = now;
            return Ok(Step::Continue);
        }

        Ok(Step::Idle)
    }

    fn shutdown<C>(&mut self, conn: &mut C, ends: &OwnerEnds)
    where
        C: QueueConnection + ?Sized,
    {
        if let Some(held) = self.held.take() {
            let pending = ends
                .take_ack()
                .is_some_and(|request| request.delivery_tag == held.delivery_tag());

            if pending || self.config.flush_on_shutdown == FlushPolicy::Always {
                match conn.ack(&held) {
                    Ok(()) => debug!(delivery_tag = held.delivery_tag(), "held message flushed"),
                    Err(e) => warn!(delivery_tag = held.delivery_tag(), error = %e, "failed to flush held message"),
                }
            } else {
                info!(
                    delivery_tag = held.delivery_tag(),
                    "leaving unprocessed message for redelivery"
                );
            }
        }

        if let Err(e) = conn.close() {
            warn!(error = %e, "failed to close connection");
        }
    }
}

/// Body of the background thread: connect, then run the machine until
/// shutdown or a fatal connection error.
pub(crate) fn run<K: Connector>(
    connector: Arc<K>,
    queue: String,
    ends: OwnerEnds,
    config: FetchConfig,
    verbose: bool,
) -> Result<()> {
    let mut conn = connector.connect(&queue)?;
    info!(queue = %queue, "fetch thread connected");

    let sleep_interval = config.sleep_interval;
    let mut machine = FetchMachine::new(config, verbose, Instant::now());

    loop {
        match machine.step(&mut conn, &ends, Instant::now()) {
            Ok(Step::Continue) => {}
            Ok(Step::Idle) => ends.idle(sleep_interval),
            Ok(Step::Exit) => {
                info!(queue = %queue, "fetch thread stopped");
                return Ok(());
            }
            Err(e) => {
                error!(queue = %queue, error = %e, "fetch thread failed");
                let _ = conn.close();
                return Err(e);
            }
        }
    }
}
