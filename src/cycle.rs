//! Event-driven consumer: one connection cycling between waiting on the
//! signal list and popping, with at most one request outstanding.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::network::resolve_addr;
use crate::protocol::reply::{decode_payload, decode_wait, Wakeup};
use crate::protocol::resp::write_command;
use crate::protocol::{Call, ProcRef, RespParser, RespValue};
use bytes::Bytes;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONNECTION: Token = Token(0);
const WAKER: Token = Token(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// `BRPOP <queue>:sigque 0` is outstanding
    WaitingSignal,
    /// The dequeue procedure call is outstanding
    Popping,
}

/// What the handler is told after each reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEvent {
    /// A notification arrived; a pop is about to be issued
    Signalled,
    /// The pop produced an item
    Popped(Bytes),
    /// The pop found nothing (another consumer won the race)
    Empty,
    /// The store answered with an error or an unexpected reply.
    /// The cycle carries on waiting.
    Failed { state: CycleState, message: String },
}

/// Why [`QueueCycle::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleExit {
    /// The handler or a [`CycleStopper`] asked to stop
    Stopped,
    /// The store closed the connection
    Disconnected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub waits: u64,
    pub pops: u64,
    pub items: u64,
}

/// Thread-safe handle that makes a running cycle return [`CycleExit::Stopped`]
#[derive(Clone)]
pub struct CycleStopper {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl CycleStopper {
    pub fn stop(&self) -> io::Result<()> {
        self.stop.store(true, Ordering::Release);
        self.waker.wake()
    }
}

pub struct QueueCycle {
    poll: Poll,
    stream: TcpStream,
    parser: RespParser,
    write_buffer: Vec<u8>,
    write_position: usize,
    read_buffer: Vec<u8>,
    state: CycleState,
    queue: String,
    dequeue: ProcRef,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
    stats: CycleStats,
    closed: bool,
}

impl QueueCycle {
    /// Connect using the address, queue and dequeue procedure from `config`
    pub fn connect(config: &Config) -> Result<Self> {
        let dequeue = config.scripts.dequeue.to_proc_ref()?;
        let addr = resolve_addr(&config.addr)?;
        let stream = match config.connect_timeout() {
            Some(timeout) => std::net::TcpStream::connect_timeout(&addr, timeout)?,
            None => std::net::TcpStream::connect(addr)?,
        };
        stream.set_nodelay(config.tcp_nodelay)?;
        Self::from_std(stream, &config.queue, dequeue)
    }

    pub fn connect_addr(addr: SocketAddr, queue: &str, dequeue: ProcRef) -> Result<Self> {
        Self::from_std(std::net::TcpStream::connect(addr)?, queue, dequeue)
    }

    /// Take over an already connected stream
    pub fn from_std(stream: std::net::TcpStream, queue: &str, dequeue: ProcRef) -> Result<Self> {
        if queue.is_empty() {
            return Err(Error::ContractViolation(
                "queue name must not be empty".to_string(),
            ));
        }

        stream.set_nonblocking(true)?;
        let mut stream = TcpStream::from_std(stream);

        let poll = Poll::new()?;
        poll.registry().register(
            &mut stream,
            CONNECTION,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            poll,
            stream,
            parser: RespParser::new(),
            write_buffer: Vec::with_capacity(256),
            write_position: 0,
            read_buffer: vec![0u8; 8192],
            state: CycleState::WaitingSignal,
            queue: queue.to_string(),
            dequeue,
            stop: Arc::new(AtomicBool::new(false)),
            waker,
            stats: CycleStats::default(),
            closed: false,
        })
    }

    pub fn stopper(&self) -> CycleStopper {
        CycleStopper {
            stop: Arc::clone(&self.stop),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Drive the cycle until the handler breaks, a stopper fires, or the
    /// connection goes away.
    ///
    /// Transport and protocol failures end the run with an error. Error
    /// replies do not; they are reported as [`CycleEvent::Failed`].
    ///
    /// However the run ends, the connection is shut down so no wait is left
    /// parked on the store. A finished cycle cannot be run again.
    pub fn run<F>(&mut self, handler: F) -> Result<CycleExit>
    where
        F: FnMut(CycleEvent) -> ControlFlow<()>,
    {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let exit = self.drive(handler);
        self.close();
        exit
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.poll.registry().deregister(&mut self.stream);
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != ErrorKind::NotConnected {
                warn!("Shutting down consumer connection failed: {}", e);
            }
        }
        debug!("Consumer connection for {} closed", self.queue);
    }

    fn drive<F>(&mut self, mut handler: F) -> Result<CycleExit>
    where
        F: FnMut(CycleEvent) -> ControlFlow<()>,
    {
        if self.stop.load(Ordering::Acquire) {
            return Ok(CycleExit::Stopped);
        }

        let mut events = Events::with_capacity(64);
        info!("Consuming {}", self.queue);
        self.issue_wait()?;

        loop {
            if self.stop.load(Ordering::Acquire) {
                return Ok(CycleExit::Stopped);
            }

            self.flush()?;

            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                if event.token() != CONNECTION {
                    continue; // waker; the flag is checked at the top
                }

                if event.is_writable() {
                    self.flush()?;
                }

                if event.is_readable() || event.is_read_closed() {
                    let open = self.fill()?;
                    while let Some(reply) = self.parser.parse_next()? {
                        if self.on_reply(reply, &mut handler)?.is_break() {
                            return Ok(CycleExit::Stopped);
                        }
                    }
                    if !open {
                        info!("Connection closed while {:?}", self.state);
                        return Ok(CycleExit::Disconnected);
                    }
                }
            }
        }
    }

    fn on_reply<F>(&mut self, reply: RespValue, handler: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(CycleEvent) -> ControlFlow<()>,
    {
        match self.state {
            CycleState::WaitingSignal => match decode_wait(reply) {
                Ok(Wakeup::Signalled) => {
                    let flow = handler(CycleEvent::Signalled);
                    if flow.is_continue() {
                        self.issue_pop()?;
                    }
                    Ok(flow)
                }
                Ok(Wakeup::TimedOut) => {
                    self.issue_wait()?;
                    Ok(ControlFlow::Continue(()))
                }
                Err(e) => {
                    // No pop without a signal.
                    warn!("Wait on {} failed: {}", self.queue, e);
                    let flow = handler(self.failure(e));
                    if flow.is_continue() {
                        self.issue_wait()?;
                    }
                    Ok(flow)
                }
            },
            CycleState::Popping => {
                let event = match decode_payload(reply) {
                    Ok(Some(item)) => {
                        self.stats.items += 1;
                        CycleEvent::Popped(item)
                    }
                    Ok(None) => CycleEvent::Empty,
                    Err(e) => {
                        warn!("Pop from {} failed: {}", self.queue, e);
                        self.failure(e)
                    }
                };
                let flow = handler(event);
                if flow.is_continue() {
                    self.issue_wait()?;
                }
                Ok(flow)
            }
        }
    }

    fn failure(&self, error: Error) -> CycleEvent {
        CycleEvent::Failed {
            state: self.state,
            message: error.to_string(),
        }
    }

    fn issue_wait(&mut self) -> Result<()> {
        self.stats.waits += 1;
        self.state = CycleState::WaitingSignal;
        let call = Call::wait_signal(&self.queue, 0);
        self.issue(&call)
    }

    fn issue_pop(&mut self) -> Result<()> {
        self.stats.pops += 1;
        self.state = CycleState::Popping;
        let script = self.dequeue.resolve()?;
        let call = script.invoke([Bytes::copy_from_slice(self.queue.as_bytes())]);
        self.issue(&call)
    }

    fn issue(&mut self, call: &Call) -> Result<()> {
        debug!(
            "{:?}: -> {}",
            self.state,
            String::from_utf8_lossy(call.command())
        );
        if self.write_position >= self.write_buffer.len() {
            self.write_buffer.clear();
            self.write_position = 0;
        }
        write_command(&mut self.write_buffer, call.args());
        self.flush()
    }

    /// Write as much as the socket takes
    fn flush(&mut self) -> Result<()> {
        while self.write_position < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[self.write_position..]) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => self.write_position += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read until the socket is drained. Returns false on EOF.
    fn fill(&mut self) -> Result<bool> {
        loop {
            match self.stream.read(&mut self.read_buffer) {
                Ok(0) => return Ok(false),
                Ok(n) => self.parser.feed(&self.read_buffer[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for QueueCycle {
    fn drop(&mut self) {
        self.close();
    }
}
