/// Command builder for queue operations
pub mod command;

/// Reply decoding per operation
pub mod reply;

/// RESP2 parser and encoder
pub mod resp;

/// Procedure reference resolution
pub mod script;

pub use command::{signal_key, Call, QueueOp, SIGNAL_SUFFIX};
pub use resp::{RespParser, RespValue};
pub use script::{ProcRef, Script};
