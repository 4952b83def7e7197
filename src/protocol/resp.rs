use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use memchr::memchr2;
use std::str;

/// RESP (REdis Serialization Protocol) parser
///
/// Incremental: bytes are fed as they arrive and complete values are pulled
/// out with [`RespParser::parse_next`]. Used by both the blocking connection
/// and the event-driven cycle.
pub struct RespParser {
    buffer: BytesMut,
    position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(Bytes),
    Error(String),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Short name of the reply variant, for error reporting
    pub fn kind(&self) -> &'static str {
        match self {
            RespValue::SimpleString(_) => "status",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(Some(_)) => "bulk string",
            RespValue::BulkString(None) | RespValue::Array(None) => "nil",
            RespValue::Array(Some(_)) => "array",
        }
    }
}

impl RespParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            position: 0,
        }
    }

    /// Feed data into the parser
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a complete value
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Parse next complete RESP value
    pub fn parse_next(&mut self) -> Result<Option<RespValue>> {
        if self.position >= self.buffer.len() {
            return Ok(None);
        }

        let remaining = &self.buffer[self.position..];

        match parse_value(remaining)? {
            Some((value, consumed)) => {
                self.position += consumed;

                // Compact buffer if needed
                if self.position > self.buffer.len() / 2 {
                    let _ = self.buffer.split_to(self.position);
                    self.position = 0;
                }

                Ok(Some(value))
            }
            None => Ok(None), // Need more data
        }
    }
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

fn protocol(msg: impl Into<String>) -> Error {
    Error::Protocol(msg.into())
}

/// Parse a RESP value from buffer
fn parse_value(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    match buf[0] {
        b'+' => parse_simple_string(buf),
        b'-' => parse_error(buf),
        b':' => parse_integer(buf),
        b'$' => parse_bulk_string(buf),
        b'*' => parse_array(buf),
        other => Err(protocol(format!("Invalid RESP type: {}", other as char))),
    }
}

/// Parse simple string: +OK\r\n
fn parse_simple_string(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    if let Some(end) = find_crlf(buf) {
        let data = Bytes::copy_from_slice(&buf[1..end]);
        Ok(Some((RespValue::SimpleString(data), end + 2)))
    } else {
        Ok(None)
    }
}

/// Parse error: -ERR message\r\n
fn parse_error(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    if let Some(end) = find_crlf(buf) {
        let msg = String::from_utf8_lossy(&buf[1..end]).into_owned();
        Ok(Some((RespValue::Error(msg), end + 2)))
    } else {
        Ok(None)
    }
}

/// Parse integer: :123\r\n
fn parse_integer(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    if let Some(end) = find_crlf(buf) {
        let num = parse_length_line(&buf[1..end], "integer")?;
        Ok(Some((RespValue::Integer(num), end + 2)))
    } else {
        Ok(None)
    }
}

/// Parse bulk string: $6\r\nfoobar\r\n or $-1\r\n (null)
fn parse_bulk_string(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    let len_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let len = parse_length_line(&buf[1..len_end], "bulk string length")?;
    if len < 0 {
        return Ok(Some((RespValue::BulkString(None), len_end + 2)));
    }

    let len = len as usize;
    let data_start = len_end + 2;
    let data_end = data_start + len;

    if buf.len() < data_end + 2 {
        return Ok(None);
    }

    // Payloads are binary; only the trailing CRLF is checked.
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return Err(protocol("Missing CRLF after bulk string"));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
    Ok(Some((RespValue::BulkString(Some(data)), data_end + 2)))
}

/// Parse array: *2\r\n$3\r\nGET\r\n$3\r\nkey\r\n
fn parse_array(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    let len_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let len = parse_length_line(&buf[1..len_end], "array length")?;
    if len < 0 {
        return Ok(Some((RespValue::Array(None), len_end + 2)));
    }

    let len = len as usize;
    let mut elements = Vec::with_capacity(len.min(1024));
    let mut pos = len_end + 2;

    for _ in 0..len {
        match parse_value(&buf[pos..])? {
            Some((value, consumed)) => {
                elements.push(value);
                pos += consumed;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((RespValue::Array(Some(elements)), pos)))
}

fn parse_length_line(line: &[u8], what: &str) -> Result<i64> {
    let text = str::from_utf8(line).map_err(|_| protocol(format!("Invalid UTF-8 in {}", what)))?;
    text.parse::<i64>()
        .map_err(|_| protocol(format!("Invalid {}: {}", what, text)))
}

/// Find CRLF in buffer
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while pos + 1 < buf.len() {
        if let Some(cr_pos) = memchr2(b'\r', b'\n', &buf[pos..]) {
            let cr_pos = pos + cr_pos;
            if cr_pos + 1 < buf.len() && buf[cr_pos] == b'\r' && buf[cr_pos + 1] == b'\n' {
                return Some(cr_pos);
            }
            pos = cr_pos + 1;
        } else {
            break;
        }
    }
    None
}

/// Encode a request as a RESP array of bulk strings
pub fn write_command<A: AsRef<[u8]>>(buf: &mut Vec<u8>, args: &[A]) {
    let mut num_buf = itoa::Buffer::new();
    buf.push(b'*');
    buf.extend_from_slice(num_buf.format(args.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        buf.push(b'$');
        buf.extend_from_slice(num_buf.format(arg.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
}

/// Write RESP value directly to buffer
pub fn write_resp_value(buf: &mut Vec<u8>, value: &RespValue) {
    match value {
        RespValue::SimpleString(s) => {
            buf.push(b'+');
            buf.extend_from_slice(s);
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::Error(e) => {
            buf.push(b'-');
            buf.extend_from_slice(e.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::Integer(n) => {
            buf.push(b':');
            let mut num_buf = itoa::Buffer::new();
            buf.extend_from_slice(num_buf.format(*n).as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(Some(s)) => {
            buf.push(b'$');
            let mut num_buf = itoa::Buffer::new();
            buf.extend_from_slice(num_buf.format(s.len()).as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(s);
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(None) => {
            buf.extend_from_slice(b"$-1\r\n");
        }
        RespValue::Array(Some(arr)) => {
            buf.push(b'*');
            let mut num_buf = itoa::Buffer::new();
            buf.extend_from_slice(num_buf.format(arr.len()).as_bytes());
            buf.extend_from_slice(b"\r\n");
            for item in arr {
                write_resp_value(buf, item);
            }
        }
        RespValue::Array(None) => {
            buf.extend_from_slice(b"*-1\r\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<RespValue> {
        let mut parser = RespParser::new();
        parser.feed(input);
        let mut out = Vec::new();
        while let Some(value) = parser.parse_next().unwrap() {
            out.push(value);
        }
        out
    }

    #[test]
    fn encodes_command() {
        let args: [&[u8]; 3] = [b"BRPOP", b"q:sigque", b"0"];
        let mut buf = Vec::new();
        write_command(&mut buf, &args);
        assert_eq!(&buf, b"*3\r\n$5\r\nBRPOP\r\n$8\r\nq:sigque\r\n$1\r\n0\r\n");
    }

    #[test]
    fn parses_reply_variants() {
        let values = parse_all(b"+OK\r\n:42\r\n$-1\r\n-ERR bad\r\n$5\r\nhello\r\n");
        assert_eq!(
            values,
            vec![
                RespValue::SimpleString(Bytes::from_static(b"OK")),
                RespValue::Integer(42),
                RespValue::BulkString(None),
                RespValue::Error("ERR bad".to_string()),
                RespValue::BulkString(Some(Bytes::from_static(b"hello"))),
            ]
        );
    }

    #[test]
    fn bulk_string_keeps_embedded_crlf_and_zero_bytes() {
        let values = parse_all(b"$6\r\na\r\n\0b\0\r\n");
        assert_eq!(
            values,
            vec![RespValue::BulkString(Some(Bytes::from_static(b"a\r\n\0b\0")))]
        );
    }

    #[test]
    fn waits_for_more_data() {
        let mut parser = RespParser::new();
        parser.feed(b"*2\r\n$8\r\nq:sigque\r\n$3\r\nt");
        assert_eq!(parser.parse_next().unwrap(), None);
        parser.feed(b"ok\r\n");
        let value = parser.parse_next().unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(Some(vec![
                RespValue::BulkString(Some(Bytes::from_static(b"q:sigque"))),
                RespValue::BulkString(Some(Bytes::from_static(b"tok"))),
            ]))
        );
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn rejects_unknown_type_byte() {
        let mut parser = RespParser::new();
        parser.feed(b"?what\r\n");
        assert!(matches!(parser.parse_next(), Err(Error::Protocol(_))));
    }

    #[test]
    fn writer_output_parses_back() {
        let value = RespValue::Array(Some(vec![
            RespValue::Integer(-3),
            RespValue::BulkString(None),
            RespValue::Array(None),
        ]));
        let mut buf = Vec::new();
        write_resp_value(&mut buf, &value);
        assert_eq!(parse_all(&buf), vec![value]);
    }
}
