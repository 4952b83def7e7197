use crate::error::{Error, Result};
use crate::protocol::script::Script;
use bytes::Bytes;

/// Suffix of the list used to wake blocked consumers of a queue.
///
/// The enqueue procedure must `LPUSH` a token there on every successful push.
pub const SIGNAL_SUFFIX: &str = ":sigque";

/// Key of the signal list paired with a queue
pub fn signal_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + SIGNAL_SUFFIX.len());
    key.push_str(name);
    key.push_str(SIGNAL_SUFFIX);
    key
}

/// One remote request, as the list of its RESP bulk-string arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    args: Vec<Bytes>,
    /// Server-side blocking timeout in seconds, 0 meaning forever
    blocking: Option<u32>,
}

impl Call {
    pub fn new(args: Vec<Bytes>) -> Self {
        Self {
            args,
            blocking: None,
        }
    }

    /// `BRPOP <name>:sigque <timeout>`
    pub fn wait_signal(name: &str, timeout: u32) -> Self {
        let mut num_buf = itoa::Buffer::new();
        Self {
            args: vec![
                Bytes::from_static(b"BRPOP"),
                Bytes::from(signal_key(name)),
                Bytes::copy_from_slice(num_buf.format(timeout).as_bytes()),
            ],
            blocking: Some(timeout),
        }
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Command verb, e.g. `EVALSHA`
    pub fn command(&self) -> &[u8] {
        self.args.first().map(|arg| &arg[..]).unwrap_or_default()
    }

    pub fn blocking_timeout(&self) -> Option<u32> {
        self.blocking
    }
}

/// A logical queue operation with exactly the fields it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOp {
    Push {
        name: String,
        priority: u32,
        expire: u32,
        value: Bytes,
    },
    Pop {
        name: String,
    },
    /// Wait on the signal list, then pop
    BPop {
        name: String,
        timeout: u32,
    },
    Len {
        name: String,
    },
    Remove {
        name: String,
    },
}

fn check_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::ContractViolation(
            "queue name must not be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

impl QueueOp {
    pub fn push(name: &str, priority: u32, expire: u32, value: impl Into<Bytes>) -> Result<Self> {
        Ok(QueueOp::Push {
            name: check_name(name)?,
            priority,
            expire,
            value: value.into(),
        })
    }

    pub fn pop(name: &str) -> Result<Self> {
        Ok(QueueOp::Pop {
            name: check_name(name)?,
        })
    }

    pub fn bpop(name: &str, timeout: u32) -> Result<Self> {
        Ok(QueueOp::BPop {
            name: check_name(name)?,
            timeout,
        })
    }

    pub fn len(name: &str) -> Result<Self> {
        Ok(QueueOp::Len {
            name: check_name(name)?,
        })
    }

    pub fn remove(name: &str) -> Result<Self> {
        Ok(QueueOp::Remove {
            name: check_name(name)?,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            QueueOp::Push { name, .. }
            | QueueOp::Pop { name }
            | QueueOp::BPop { name, .. }
            | QueueOp::Len { name }
            | QueueOp::Remove { name } => name,
        }
    }

    /// The calls to issue, in order. Only `BPop` produces two.
    pub fn build(&self, script: &Script<'_>) -> Vec<Call> {
        let name = Bytes::copy_from_slice(self.name().as_bytes());
        match self {
            QueueOp::Push {
                priority,
                expire,
                value,
                ..
            } => {
                let mut num_buf = itoa::Buffer::new();
                let priority = Bytes::copy_from_slice(num_buf.format(*priority).as_bytes());
                let expire = Bytes::copy_from_slice(num_buf.format(*expire).as_bytes());
                vec![script.invoke([name, priority, expire, value.clone()])]
            }
            QueueOp::BPop { timeout, .. } => vec![
                Call::wait_signal(self.name(), *timeout),
                script.invoke([name]),
            ],
            QueueOp::Pop { .. } | QueueOp::Len { .. } | QueueOp::Remove { .. } => {
                vec![script.invoke([name])]
            }
        }
    }
}
