mod connection;

pub use connection::{Connection, Transport};
pub(crate) use connection::resolve_addr;
