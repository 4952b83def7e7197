//! In-process stand-in for a Redis server with the queue procedures loaded.
//!
//! Procedures are recognised by digest (`enqueue-sha`, ...) or, for inline
//! `EVAL`, by a leading `-- enqueue` style comment in the source. Items are
//! ordered by ascending priority, then insertion. Every push adds a token to
//! `<name>:sigque`, like the real enqueue script.

#![allow(dead_code)]

use bytes::Bytes;
use prique::protocol::resp::write_resp_value;
use prique::protocol::{RespParser, RespValue};
use prique::{Config, ProcRef};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const ENQUEUE_SHA: &str = "enqueue-sha";
pub const DEQUEUE_SHA: &str = "dequeue-sha";
pub const LEN_SHA: &str = "len-sha";
pub const REMOVE_SHA: &str = "remove-sha";

#[derive(Default)]
struct State {
    queues: HashMap<String, BTreeMap<(u32, u64), Bytes>>,
    lists: HashMap<String, VecDeque<Bytes>>,
    seq: u64,
    log: Vec<Vec<String>>,
    blocked: usize,
}

#[derive(Clone)]
pub struct FakeStore {
    addr: String,
    shared: Arc<(Mutex<State>, Condvar)>,
}

impl FakeStore {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let shared = Arc::new((Mutex::new(State::default()), Condvar::new()));

        let accept_shared = Arc::clone(&shared);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let shared = Arc::clone(&accept_shared);
                thread::spawn(move || serve(stream, shared));
            }
        });

        Self { addr, shared }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Config pointing at this store with every procedure given by digest
    pub fn config(&self, queue: &str) -> Config {
        let mut config = Config {
            addr: self.addr.clone(),
            queue: queue.to_string(),
            read_timeout_ms: 2000,
            ..Default::default()
        };
        config.scripts.enqueue.sha1 = Some(ENQUEUE_SHA.to_string());
        config.scripts.dequeue.sha1 = Some(DEQUEUE_SHA.to_string());
        config.scripts.len.sha1 = Some(LEN_SHA.to_string());
        config.scripts.remove.sha1 = Some(REMOVE_SHA.to_string());
        config
    }

    /// Every command received so far, rendered as strings
    pub fn log(&self) -> Vec<Vec<String>> {
        self.shared.0.lock().unwrap().log.clone()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.log().into_iter().map(|args| args[0].clone()).collect()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.verbs().iter().filter(|v| v.as_str() == verb).count()
    }

    /// Connections currently parked in `BRPOP`
    pub fn blocked(&self) -> usize {
        self.shared.0.lock().unwrap().blocked
    }

    /// Poll until no connection is parked in `BRPOP`
    pub fn wait_unblocked(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.blocked() > 0 {
            assert!(Instant::now() < deadline, "a BRPOP is still parked");
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Poll the command log until `verb` has been seen `n` times
    pub fn wait_for(&self, verb: &str, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.count(verb) < n {
            assert!(Instant::now() < deadline, "timed out waiting for {}", verb);
            thread::sleep(Duration::from_millis(10));
        }
    }
}

pub fn sha(digest: &str) -> ProcRef {
    ProcRef::sha1(digest)
}

/// Write a script file whose first line identifies the procedure
pub fn script_file(kind: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "prique-it-{}-{}-{:?}.lua",
        kind,
        std::process::id(),
        thread::current().id()
    ));
    std::fs::write(&path, format!("-- {}\nreturn nil\n", kind)).expect("write script");
    path
}

fn serve(mut stream: TcpStream, shared: Arc<(Mutex<State>, Condvar)>) {
    let mut parser = RespParser::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        parser.feed(&buf[..n]);
        while let Ok(Some(request)) = parser.parse_next() {
            let args = match request {
                RespValue::Array(Some(items)) => items
                    .into_iter()
                    .map(|item| match item {
                        RespValue::BulkString(Some(data)) => data,
                        _ => Bytes::new(),
                    })
                    .collect::<Vec<_>>(),
                _ => return,
            };
            let Some(reply) = execute(&shared, &stream, args) else {
                return;
            };
            let mut out = Vec::new();
            write_resp_value(&mut out, &reply);
            if stream.write_all(&out).is_err() {
                return;
            }
        }
    }
}

fn text(data: &Bytes) -> String {
    String::from_utf8_lossy(data).into_owned()
}

/// True once the peer has hung up. Only meaningful while no request is
/// pending on `stream`, i.e. during a blocking wait.
fn peer_gone(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut byte = [0u8; 1];
    let gone = match stream.peek(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => e.kind() != std::io::ErrorKind::WouldBlock,
    };
    let _ = stream.set_nonblocking(false);
    gone
}

/// Run one command. `None` means the client went away while blocked and
/// nothing should be answered.
fn execute(
    shared: &(Mutex<State>, Condvar),
    stream: &TcpStream,
    args: Vec<Bytes>,
) -> Option<RespValue> {
    let (lock, signal) = shared;
    let mut state = lock.lock().unwrap();
    state.log.push(args.iter().map(text).collect());

    match text(&args[0]).to_ascii_uppercase().as_str() {
        "BRPOP" => {
            let key = text(&args[1]);
            let timeout: u64 = text(&args[2]).parse().unwrap_or(0);
            let deadline = (timeout > 0).then(|| Instant::now() + Duration::from_secs(timeout));
            state.blocked += 1;
            let reply = loop {
                if peer_gone(stream) {
                    // A real server drops the waiter without consuming a token.
                    break None;
                }
                if let Some(token) = state.lists.get_mut(&key).and_then(|l| l.pop_back()) {
                    break Some(RespValue::Array(Some(vec![
                        RespValue::BulkString(Some(Bytes::from(key))),
                        RespValue::BulkString(Some(token)),
                    ])));
                }
                let slice = Duration::from_millis(20);
                let wait = match deadline {
                    None => slice,
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break Some(RespValue::Array(None));
                        }
                        slice.min(deadline - now)
                    }
                };
                state = signal.wait_timeout(state, wait).unwrap().0;
            };
            state.blocked -= 1;
            reply
        }
        "EVALSHA" | "EVAL" => {
            let body = text(&args[1]);
            let kind = [
                (ENQUEUE_SHA, "enqueue"),
                (DEQUEUE_SHA, "dequeue"),
                (LEN_SHA, "len"),
                (REMOVE_SHA, "remove"),
            ]
            .into_iter()
            .find(|(digest, name)| body == *digest || body.starts_with(&format!("-- {}\n", name)))
            .map(|(_, name)| name);
            let argv = &args[3..];
            let name = text(&argv[0]);

            Some(match kind {
                Some("enqueue") => {
                    let priority: u32 = text(&argv[1]).parse().unwrap();
                    state.seq += 1;
                    let seq = state.seq;
                    state
                        .queues
                        .entry(name.clone())
                        .or_default()
                        .insert((priority, seq), argv[3].clone());
                    state
                        .lists
                        .entry(format!("{}:sigque", name))
                        .or_default()
                        .push_front(Bytes::from_static(b"1"));
                    signal.notify_all();
                    RespValue::Integer(1)
                }
                Some("dequeue") => {
                    let item = state
                        .queues
                        .get_mut(&name)
                        .and_then(|q| q.pop_first())
                        .map(|(_, value)| value);
                    RespValue::BulkString(item)
                }
                Some("len") => RespValue::Integer(
                    state.queues.get(&name).map(|q| q.len()).unwrap_or(0) as i64,
                ),
                Some("remove") => {
                    state.lists.remove(&format!("{}:sigque", name));
                    RespValue::Integer(state.queues.remove(&name).is_some() as i64)
                }
                _ => RespValue::Error("NOSCRIPT No matching script.".to_string()),
            })
        }
        other => Some(RespValue::Error(format!("ERR unknown command '{}'", other))),
    }
}
