//! Interpretation of replies for each queue operation.

use crate::error::{Error, Result};
use crate::protocol::resp::RespValue;
use bytes::Bytes;

fn unexpected(expected: &'static str, found: &RespValue) -> Error {
    Error::UnexpectedReply {
        expected,
        found: found.kind(),
    }
}

/// Push commits only on integer `1`.
pub fn decode_push(reply: RespValue) -> Result<()> {
    match reply {
        RespValue::Integer(1) => Ok(()),
        RespValue::Integer(other) => Err(Error::PushRejected(other)),
        RespValue::Error(message) => Err(Error::Server(message)),
        other => Err(unexpected("integer", &other)),
    }
}

/// Payload of a pop. Nil and empty strings both mean nothing was available.
pub fn decode_payload(reply: RespValue) -> Result<Option<Bytes>> {
    match reply {
        RespValue::BulkString(Some(data)) | RespValue::SimpleString(data) if !data.is_empty() => {
            Ok(Some(data))
        }
        RespValue::BulkString(_) | RespValue::SimpleString(_) | RespValue::Array(None) => Ok(None),
        RespValue::Error(message) => Err(Error::Server(message)),
        other => Err(unexpected("bulk string or nil", &other)),
    }
}

pub fn decode_integer(reply: RespValue) -> Result<i64> {
    match reply {
        RespValue::Integer(value) => Ok(value),
        RespValue::Error(message) => Err(Error::Server(message)),
        other => Err(unexpected("integer", &other)),
    }
}

/// Outcome of a blocking wait on the signal list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wakeup {
    /// A notification was consumed
    Signalled,
    /// The timeout elapsed without one
    TimedOut,
}

/// `BRPOP` answers `[key, token]` on wake-up and nil on timeout.
pub fn decode_wait(reply: RespValue) -> Result<Wakeup> {
    match reply {
        RespValue::Array(Some(items)) if items.len() == 2 => Ok(Wakeup::Signalled),
        RespValue::Array(None) | RespValue::BulkString(None) => Ok(Wakeup::TimedOut),
        RespValue::Error(message) => Err(Error::Server(message)),
        other => Err(unexpected("two-element array or nil", &other)),
    }
}
