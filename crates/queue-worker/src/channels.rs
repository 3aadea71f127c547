//! Hand-off slots between the fetch thread (owner) and the caller (consumer).
//!
//! Each slot has capacity one and exactly one producer and one consumer.
//! All consumer-side operations are non-blocking.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use queue_worker_core::{DeliveryTag, Message};
use std::cell::Cell;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// A second item was sent before the first was drained.
    #[error("channel slot is already occupied")]
    Full,

    #[error("peer has disconnected")]
    Disconnected,
}

impl<T> From<TrySendError<T>> for ChannelError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Disconnected(_) => ChannelError::Disconnected,
        }
    }
}

/// Request to acknowledge the delivery with this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRequest {
    pub delivery_tag: DeliveryTag,
}

/// Ends held by the fetch thread.
pub struct OwnerEnds {
    fetch_tx: Sender<Message>,
    ack_rx: Receiver<AckRequest>,
    shutdown_rx: Receiver<()>,
    shutdown_seen: Cell<bool>,
}

/// Ends held by the caller.
pub struct ConsumerEnds {
    fetch_rx: Receiver<Message>,
    ack_tx: Sender<AckRequest>,
    shutdown_tx: Sender<()>,
}

/// Create the FetchChannel, AckChannel and ShutdownChannel.
pub fn pair() -> (OwnerEnds, ConsumerEnds) {
    let (fetch_tx, fetch_rx) = bounded(1);
    let (ack_tx, ack_rx) = bounded(1);
    let (shutdown_tx, shutdown_rx) = bounded(1);

    (
        OwnerEnds {
            fetch_tx,
            ack_rx,
            shutdown_rx,
            shutdown_seen: Cell::new(false),
        },
        ConsumerEnds {
            fetch_rx,
            ack_tx,
            shutdown_tx,
        },
    )
}

impl OwnerEnds {
    /// Hand a fetched message to the caller.
    pub fn deliver(&self, msg: Message) -> Result<(), ChannelError> {
        Ok(self.fetch_tx.try_send(msg)?)
    }

    pub fn take_ack(&self) -> Option<AckRequest> {
        self.ack_rx.try_recv().ok()
    }

    /// Whether termination was requested. A vanished caller counts as a
    /// request. Consumes the signal.
    pub fn shutdown_requested(&self) -> bool {
        if !self.shutdown_seen.get() {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => self.shutdown_seen.set(true),
                Err(TryRecvError::Empty) => {}
            }
        }
        self.shutdown_seen.get()
    }

    /// Sleep for `interval`, waking early if shutdown is requested.
    pub fn idle(&self, interval: Duration) {
        if self.shutdown_seen.get() {
            return;
        }
        match self.shutdown_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => self.shutdown_seen.set(true),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

impl ConsumerEnds {
    /// Non-blocking check of the FetchChannel.
    pub fn try_next(&self) -> Result<Option<Message>, ChannelError> {
        match self.fetch_rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ChannelError::Disconnected),
        }
    }

    pub fn request_ack(&self, delivery_tag: DeliveryTag) -> Result<(), ChannelError> {
        Ok(self.ack_tx.try_send(AckRequest { delivery_tag })?)
    }

    /// One-shot; repeated requests are no-ops.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}
