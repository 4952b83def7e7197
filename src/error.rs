use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Caller broke an API contract (missing procedure reference, empty queue name).
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Inline script could not be loaded.
    #[error("Cannot load script {}: {source}", .path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    ConnectionClosed,

    /// The store executed the call and answered with an error reply.
    #[error("Server error: {0}")]
    Server(String),

    #[error("Unexpected reply: expected {expected}, found {found}")]
    UnexpectedReply {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Push not committed (reply {0})")]
    PushRejected(i64),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Connection-level failures. The connection should not be reused after one of these.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Protocol(_) | Error::ConnectionClosed
        )
    }

    /// OS error code carried by a resource failure
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Error::Resource { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
