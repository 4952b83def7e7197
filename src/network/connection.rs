use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::resp::{write_command, RespValue};
use crate::protocol::{Call, RespParser};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Anything that can carry a call to the store and bring back its reply.
///
/// Implemented by [`Connection`]; tests substitute recording fakes.
pub trait Transport {
    /// Send one call and block until its reply arrives
    fn call(&mut self, call: &Call) -> Result<RespValue>;

    /// Send every call, then read the replies in order
    fn pipeline(&mut self, calls: &[Call]) -> Result<Vec<RespValue>> {
        calls.iter().map(|call| self.call(call)).collect()
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn call(&mut self, call: &Call) -> Result<RespValue> {
        (**self).call(call)
    }

    fn pipeline(&mut self, calls: &[Call]) -> Result<Vec<RespValue>> {
        (**self).pipeline(calls)
    }
}

/// Blocking connection to the store
///
/// One request in flight at a time; the reply always belongs to the
/// preceding request. After a transport failure the connection refuses
/// further calls.
pub struct Connection {
    stream: TcpStream,
    parser: RespParser,
    read_timeout: Option<Duration>,
    write_buffer: Vec<u8>,
    read_buffer: Vec<u8>,
    closed: bool,
}

impl Connection {
    /// Connect using the address and socket options from `config`
    pub fn connect(config: &Config) -> Result<Self> {
        let addr = resolve_addr(&config.addr)?;
        let stream = match config.connect_timeout() {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_write_timeout(config.write_timeout())?;
        stream.set_nodelay(config.tcp_nodelay)?;
        debug!("Connected to {}", addr);
        Self::from_stream(stream, config.read_timeout())
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, read_timeout: Option<Duration>) -> Result<Self> {
        stream.set_read_timeout(read_timeout)?;
        Ok(Self {
            stream,
            parser: RespParser::new(),
            read_timeout,
            write_buffer: Vec::with_capacity(256),
            read_buffer: vec![0u8; 8192],
            closed: false,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn send(&mut self, calls: &[Call]) -> Result<()> {
        self.write_buffer.clear();
        for call in calls {
            write_command(&mut self.write_buffer, call.args());
        }
        self.stream.write_all(&self.write_buffer)?;
        self.stream.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<RespValue> {
        loop {
            if let Some(value) = self.parser.parse_next()? {
                return Ok(value);
            }
            let n = self.stream.read(&mut self.read_buffer)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.parser.feed(&self.read_buffer[..n]);
        }
    }

    /// Stretch the socket read timeout over a server-side blocking wait
    fn blocking_read_timeout(&self, server_timeout: u32) -> Option<Duration> {
        if server_timeout == 0 {
            return None;
        }
        let wait = Duration::from_secs(u64::from(server_timeout));
        Some(wait + self.read_timeout.unwrap_or(Duration::from_secs(1)))
    }

    fn exchange(&mut self, call: &Call) -> Result<RespValue> {
        match call.blocking_timeout() {
            Some(server_timeout) => {
                self.stream
                    .set_read_timeout(self.blocking_read_timeout(server_timeout))?;
                self.send(std::slice::from_ref(call))?;
                let reply = self.receive();
                self.stream.set_read_timeout(self.read_timeout)?;
                reply
            }
            None => {
                self.send(std::slice::from_ref(call))?;
                self.receive()
            }
        }
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if e.is_transport() {
                debug!("Connection marked closed after transport error: {}", e);
                self.closed = true;
            }
        }
        result
    }
}

impl Transport for Connection {
    fn call(&mut self, call: &Call) -> Result<RespValue> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let result = self.exchange(call);
        self.guard(result)
    }

    fn pipeline(&mut self, calls: &[Call]) -> Result<Vec<RespValue>> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let result = self.send(calls).and_then(|()| {
            let mut replies = Vec::with_capacity(calls.len());
            for _ in calls {
                replies.push(self.receive()?);
            }
            Ok(replies)
        });
        self.guard(result)
    }
}

pub(crate) fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Config(format!("address {} did not resolve", addr)))
}
