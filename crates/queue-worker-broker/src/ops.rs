//! Queue maintenance helpers built on the connection traits.

use crate::connection::{Connector, QueueConnection};
use crate::retry::RetryPolicy;
use queue_worker_core::{KwArgs, Message, Result, TaskCall};
use serde_json::Value;
use tracing::{debug, info};

/// Put one payload, retrying transient failures per `policy`.
pub fn submit_msg<C: QueueConnection + ?Sized>(
    conn: &mut C,
    payload: &str,
    policy: &RetryPolicy,
) -> Result<()> {
    policy.run(|_| conn.put(payload))
}

/// Insert payloads into `queue` over a fresh connection.
pub fn insert_msgs<C, I, S>(connector: &C, queue: &str, payloads: I) -> Result<usize>
where
    C: Connector,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let policy = RetryPolicy::default();
    let mut conn = connector.connect(queue)?;

    let mut inserted = 0;
    for payload in payloads {
        submit_msg(&mut conn, payload.as_ref(), &policy)?;
        inserted += 1;
    }
    conn.close()?;

    debug!(queue, inserted, "messages inserted");
    Ok(inserted)
}

/// Encode and insert a batch of task calls. `task_args` and `task_kwargs`
/// are parallel lists and must have the same length.
pub fn insert_tasks<C: Connector>(
    connector: &C,
    queue: &str,
    task_args: Vec<Vec<Value>>,
    task_kwargs: Vec<KwArgs>,
) -> Result<usize> {
    let payloads = TaskCall::encode_batch(task_args, task_kwargs)?;
    insert_msgs(connector, queue, payloads)
}

/// Dequeue a single message without going through a worker.
pub fn fetch_msg<C: QueueConnection + ?Sized>(conn: &mut C, verbose: bool) -> Result<Message> {
    let msg = conn.get_nowait()?;
    if verbose {
        info!("Fetched a message from the queue: {}", msg.payload());
    }
    Ok(msg)
}

/// Remove every ready message from `queue`.
pub fn purge_queue<C: Connector>(connector: &C, queue: &str) -> Result<u64> {
    let mut conn = connector.connect(queue)?;
    let removed = conn.purge()?;
    conn.close()?;

    info!(queue, removed, "queue purged");
    Ok(removed)
}
