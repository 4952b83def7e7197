//! Synchronous queue operations.
//!
//! The free functions work over any [`Transport`] and take the procedure
//! reference explicitly. [`QueueClient`] binds a connection, a queue name
//! and the configured procedures together.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::network::{Connection, Transport};
use crate::protocol::reply::{decode_integer, decode_payload, decode_push, decode_wait, Wakeup};
use crate::protocol::{Call, ProcRef, QueueOp};
use bytes::Bytes;
use std::time::{Duration, Instant};
use tracing::debug;

/// What a blocking pop does when it is woken but the pop comes back empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyWakeup {
    /// Report "empty" to the caller
    Return,
    /// Go back to waiting for the time that is left
    Rewait,
}

/// An item for [`push_batch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub priority: u32,
    pub expire: u32,
    pub value: Bytes,
}

impl Item {
    pub fn new(priority: u32, expire: u32, value: impl Into<Bytes>) -> Self {
        Self {
            priority,
            expire,
            value: value.into(),
        }
    }
}

fn call_one<T: Transport>(conn: &mut T, call: &Call) -> Result<crate::protocol::RespValue> {
    debug!(
        "-> {} ({} args)",
        String::from_utf8_lossy(call.command()),
        call.args().len()
    );
    conn.call(call)
}

/// Run an operation that maps to exactly one call
fn single<T: Transport>(
    conn: &mut T,
    proc_ref: &ProcRef,
    op: &QueueOp,
) -> Result<crate::protocol::RespValue> {
    let script = proc_ref.resolve()?;
    let calls = op.build(&script);
    match calls.as_slice() {
        [call] => call_one(conn, call),
        _ => Err(Error::ContractViolation(format!(
            "{:?} does not map to a single call",
            op
        ))),
    }
}

/// Push one item. Succeeds only when the procedure answers `1`.
pub fn push<T: Transport>(
    conn: &mut T,
    proc_ref: &ProcRef,
    name: &str,
    priority: u32,
    expire: u32,
    value: &[u8],
) -> Result<()> {
    let op = QueueOp::push(name, priority, expire, Bytes::copy_from_slice(value))?;
    decode_push(single(conn, proc_ref, &op)?)
}

/// Pop without blocking. `Ok(None)` when nothing is queued.
pub fn pop<T: Transport>(conn: &mut T, proc_ref: &ProcRef, name: &str) -> Result<Option<Bytes>> {
    let op = QueueOp::pop(name)?;
    decode_payload(single(conn, proc_ref, &op)?)
}

/// Wait on the signal list for up to `timeout` seconds (0 = forever), then pop.
///
/// A timed-out wait returns `Ok(None)` and never issues the pop. Any error
/// from the wait aborts before the pop.
pub fn bpop<T: Transport>(
    conn: &mut T,
    proc_ref: &ProcRef,
    name: &str,
    timeout: u32,
) -> Result<Option<Bytes>> {
    bpop_with(conn, proc_ref, name, timeout, EmptyWakeup::Return)
}

/// [`bpop`] with an explicit policy for a wake-up that finds the queue empty,
/// which happens when another consumer took the item first.
pub fn bpop_with<T: Transport>(
    conn: &mut T,
    proc_ref: &ProcRef,
    name: &str,
    timeout: u32,
    on_empty: EmptyWakeup,
) -> Result<Option<Bytes>> {
    let deadline = (timeout > 0).then(|| Instant::now() + Duration::from_secs(u64::from(timeout)));
    let mut remaining = timeout;

    loop {
        let op = QueueOp::bpop(name, remaining)?;
        let script = proc_ref.resolve()?;
        let calls = op.build(&script);
        let (wait, pop) = match calls.as_slice() {
            [wait, pop] => (wait, pop),
            _ => {
                return Err(Error::ContractViolation(
                    "blocking pop must map to wait and pop".to_string(),
                ))
            }
        };

        if decode_wait(call_one(conn, wait)?)? == Wakeup::TimedOut {
            debug!("Wait on {} timed out", name);
            return Ok(None);
        }

        let payload = decode_payload(call_one(conn, pop)?)?;
        if payload.is_some() || on_empty == EmptyWakeup::Return {
            return Ok(payload);
        }

        // Woken, but the item went to someone else.
        if let Some(deadline) = deadline {
            let left = deadline.saturating_duration_since(Instant::now()).as_secs();
            if left == 0 {
                return Ok(None);
            }
            remaining = u32::try_from(left).unwrap_or(u32::MAX);
        }
        debug!("Empty wake-up on {}, waiting again", name);
    }
}

/// Queue length as reported by the procedure
pub fn len<T: Transport>(conn: &mut T, proc_ref: &ProcRef, name: &str) -> Result<i64> {
    let op = QueueOp::len(name)?;
    decode_integer(single(conn, proc_ref, &op)?)
}

/// Remove the queue; returns the procedure's integer reply
pub fn remove<T: Transport>(conn: &mut T, proc_ref: &ProcRef, name: &str) -> Result<i64> {
    let op = QueueOp::remove(name)?;
    decode_integer(single(conn, proc_ref, &op)?)
}

/// Push many items in one pipeline.
///
/// The script is resolved once for the whole batch. Transport failures fail
/// the batch; per-item rejections are reported per item.
pub fn push_batch<T: Transport>(
    conn: &mut T,
    proc_ref: &ProcRef,
    name: &str,
    items: &[Item],
) -> Result<Vec<Result<()>>> {
    let script = proc_ref.resolve()?;
    let mut calls = Vec::with_capacity(items.len());
    for item in items {
        let op = QueueOp::push(name, item.priority, item.expire, item.value.clone())?;
        calls.extend(op.build(&script));
    }
    drop(script);

    debug!("Pipelining {} pushes to {}", calls.len(), name);
    let replies = conn.pipeline(&calls)?;
    Ok(replies.into_iter().map(decode_push).collect())
}

/// Procedures used by a [`QueueClient`]
#[derive(Debug, Clone, Default)]
pub struct Procedures {
    pub enqueue: Option<ProcRef>,
    pub dequeue: Option<ProcRef>,
    pub len: Option<ProcRef>,
    pub remove: Option<ProcRef>,
}

impl Procedures {
    pub fn from_config(config: &Config) -> Self {
        let scripts = &config.scripts;
        Self {
            enqueue: scripts.enqueue.to_proc_ref().ok(),
            dequeue: scripts.dequeue.to_proc_ref().ok(),
            len: scripts.len.to_proc_ref().ok(),
            remove: scripts.remove.to_proc_ref().ok(),
        }
    }
}

fn required<'a>(proc_ref: &'a Option<ProcRef>, what: &str) -> Result<&'a ProcRef> {
    proc_ref
        .as_ref()
        .ok_or_else(|| Error::ContractViolation(format!("no {} procedure configured", what)))
}

/// Blocking client for one queue over one connection
pub struct QueueClient<T = Connection> {
    transport: T,
    queue: String,
    procedures: Procedures,
    on_empty: EmptyWakeup,
}

impl QueueClient<Connection> {
    /// Connect to the store described by `config`
    pub fn connect(config: &Config) -> Result<Self> {
        config.validate()?;
        let transport = Connection::connect(config)?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport> QueueClient<T> {
    pub fn with_transport(transport: T, config: &Config) -> Self {
        Self {
            transport,
            queue: config.queue.clone(),
            procedures: Procedures::from_config(config),
            on_empty: if config.rewait_on_empty {
                EmptyWakeup::Rewait
            } else {
                EmptyWakeup::Return
            },
        }
    }

    pub fn with_procedures(mut self, procedures: Procedures) -> Self {
        self.procedures = procedures;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn push(&mut self, priority: u32, expire: u32, value: &[u8]) -> Result<()> {
        let proc_ref = required(&self.procedures.enqueue, "enqueue")?;
        push(
            &mut self.transport,
            proc_ref,
            &self.queue,
            priority,
            expire,
            value,
        )
    }

    pub fn push_batch(&mut self, items: &[Item]) -> Result<Vec<Result<()>>> {
        let proc_ref = required(&self.procedures.enqueue, "enqueue")?;
        push_batch(&mut self.transport, proc_ref, &self.queue, items)
    }

    pub fn pop(&mut self) -> Result<Option<Bytes>> {
        let proc_ref = required(&self.procedures.dequeue, "dequeue")?;
        pop(&mut self.transport, proc_ref, &self.queue)
    }

    pub fn bpop(&mut self, timeout: u32) -> Result<Option<Bytes>> {
        let proc_ref = required(&self.procedures.dequeue, "dequeue")?;
        bpop_with(
            &mut self.transport,
            proc_ref,
            &self.queue,
            timeout,
            self.on_empty,
        )
    }

    pub fn len(&mut self) -> Result<i64> {
        let proc_ref = required(&self.procedures.len, "len")?;
        len(&mut self.transport, proc_ref, &self.queue)
    }

    pub fn remove(&mut self) -> Result<i64> {
        let proc_ref = required(&self.procedures.remove, "remove")?;
        remove(&mut self.transport, proc_ref, &self.queue)
    }
}
